/// Map a jinja chat template onto the daemon's placeholder prompt form.
///
/// Only the template families the curated registry actually ships are
/// recognized; anything else returns `None` and the descriptor keeps its
/// default.
pub fn prompt_template_from_chat(jinja: &str) -> Option<String> {
    if jinja.contains("<|im_start|>") {
        // ChatML (qwen, tinyllama-chat, openhermes, ...)
        return Some(
            "<|im_start|>system\n{system_message}<|im_end|>\n<|im_start|>user\n{prompt}<|im_end|>\n<|im_start|>assistant"
                .to_owned(),
        );
    }
    if jinja.contains("[INST]") {
        // Llama-2 / Mistral instruct
        return Some(
            "[INST] <<SYS>>\n{system_message}\n<</SYS>>\n{prompt} [/INST]".to_owned(),
        );
    }
    if jinja.contains("<|assistant|>") && jinja.contains("<|user|>") {
        // Zephyr / stablelm
        return Some(
            "<|system|>\n{system_message}</s>\n<|user|>\n{prompt}</s>\n<|assistant|>\n".to_owned(),
        );
    }
    if jinja.contains("<|start_header_id|>") {
        // Llama-3
        return Some(
            "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system_message}<|eot_id|><|start_header_id|>user<|end_header_id|>\n\n{prompt}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n"
                .to_owned(),
        );
    }
    None
}
