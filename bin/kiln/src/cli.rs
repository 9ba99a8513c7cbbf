//! The clap command tree and command execution.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use kiln_core::{CoreError, Kiln};
use kiln_fetch::ResumePolicy;
use kiln_model::ModelError;
use kiln_types::ModelHandle;

use crate::chat;

#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Local LLM orchestration daemon")]
pub struct Cli {
    /// Run the API server in the foreground.
    #[arg(long = "start-server")]
    pub start_server: bool,

    /// Exec mode: load the Python engine and run SCRIPT (with optional
    /// PY_HOME). Never touches the catalog.
    #[arg(
        long = "run_python_file",
        num_args = 1..=2,
        value_names = ["SCRIPT", "PY_HOME"]
    )]
    pub run_python_file: Vec<String>,

    /// Duplicate log records to stderr.
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pull a model, install its engine, start the server and chat.
    Run { handle: String },
    /// Download a model by handle.
    Pull { handle: String },
    /// Model catalog operations.
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Engine registry operations.
    Engines {
        #[command(subcommand)]
        command: EnginesCommand,
    },
    /// Run the API server in the foreground.
    StartServer,
}

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    /// List every model in the catalog.
    List,
    /// Show one model's descriptor.
    Get { id: String },
    /// Delete a model and the files it owns.
    Delete { id: String },
    /// Set a model's alias.
    Alias { id: String, alias: String },
    /// Import a local GGUF file under a new id.
    Import { id: String, path: String },
}

#[derive(Debug, Subcommand)]
pub enum EnginesCommand {
    /// Install the best-matching engine variant for this host.
    Install { name: String },
    /// List known engines and their install state.
    List,
    /// Remove an installed engine.
    Uninstall { name: String },
}

impl Cli {
    pub fn wants_server(&self) -> bool {
        self.start_server || matches!(self.command, Some(Command::StartServer))
    }
}

/// Execute a parsed subcommand against the service plane.
pub async fn execute(kiln: Arc<Kiln>, command: Command) -> Result<(), CoreError> {
    match command {
        Command::Run { handle } => {
            let handle: ModelHandle = handle.parse()?;
            let config = kiln.config().clone();
            let outcome = kiln_core::run::run_pipeline(
                &kiln,
                &handle,
                &config.api_server_host,
                config.api_server_port,
            )
            .await?;
            println!(
                "Model {} ready on {} ({})",
                outcome.entry.model_id,
                config.server_addr(),
                outcome.descriptor.engine
            );
            chat::repl(
                &format!("http://{}", config.server_addr()),
                &outcome.entry.model_id,
            )
            .await
            .map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
            Ok(())
        }

        Command::Pull { handle } => {
            let handle: ModelHandle = handle.parse()?;
            let entry = kiln.pull_model(&handle, ResumePolicy::Prompted).await?;
            println!("Model {} downloaded successfully!", entry.model_id);
            Ok(())
        }

        Command::Models { command } => execute_models(&kiln, command),

        Command::Engines { command } => execute_engines(&kiln, command).await,

        // Handled by main before dispatch.
        Command::StartServer => Ok(()),
    }
}

fn execute_models(kiln: &Kiln, command: ModelsCommand) -> Result<(), CoreError> {
    match command {
        ModelsCommand::List => {
            for entry in kiln.catalog().load_all() {
                println!(
                    "{:<32} {:<32} {}",
                    entry.model_id, entry.alias, entry.status
                );
            }
            Ok(())
        }
        ModelsCommand::Get { id } => {
            let entry = kiln
                .catalog()
                .resolve(&id)
                .ok_or_else(|| CoreError::Model(ModelError::NotFound(id)))?;
            let descriptor = kiln.read_descriptor(&entry)?;
            print!("{}", descriptor.to_yaml_string());
            Ok(())
        }
        ModelsCommand::Delete { id } => {
            kiln.catalog().delete(&id)?;
            println!("Model {id} deleted successfully!");
            Ok(())
        }
        ModelsCommand::Alias { id, alias } => {
            kiln.catalog().update_alias(&id, &alias)?;
            println!("Alias {alias} set for model {id}");
            Ok(())
        }
        ModelsCommand::Import { id, path } => {
            let entry = kiln.import_model(&id, &path)?;
            println!("Model {} imported successfully!", entry.model_id);
            Ok(())
        }
    }
}

async fn execute_engines(kiln: &Kiln, command: EnginesCommand) -> Result<(), CoreError> {
    match command {
        EnginesCommand::Install { name } => {
            let info = kiln.install_engine(&name).await?;
            println!("Engine {} {} installed", info.name, info.version);
            Ok(())
        }
        EnginesCommand::List => {
            for info in kiln.list_engines() {
                let variant = info
                    .variant
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_owned());
                println!(
                    "{:<24} {:<10} {:<24} {}",
                    info.name, info.version, variant, info.status
                );
            }
            Ok(())
        }
        EnginesCommand::Uninstall { name } => {
            kiln.uninstall_engine(&name)?;
            println!("Engine {name} uninstalled");
            Ok(())
        }
    }
}

/// CLI exit codes: 2 for user-input errors, 1 for everything fatal.
pub fn exit_code_for(error: &CoreError) -> u8 {
    match error {
        CoreError::Handle(_)
        | CoreError::Model(ModelError::Duplicate { .. })
        | CoreError::Model(ModelError::NotFound(_)) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_and_flags() {
        let cli = Cli::parse_from(["kiln", "--verbose", "run", "cortexso/tinyllama:1b-gguf"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Command::Run { .. })));
        assert!(!cli.wants_server());
    }

    #[test]
    fn parses_start_server_both_spellings() {
        assert!(Cli::parse_from(["kiln", "--start-server"]).wants_server());
        assert!(Cli::parse_from(["kiln", "start-server"]).wants_server());
    }

    #[test]
    fn parses_exec_mode_with_optional_py_home() {
        let cli = Cli::parse_from(["kiln", "--run_python_file", "job.py"]);
        assert_eq!(cli.run_python_file, vec!["job.py"]);

        let cli = Cli::parse_from(["kiln", "--run_python_file", "job.py", "/opt/py"]);
        assert_eq!(cli.run_python_file, vec!["job.py", "/opt/py"]);
    }

    #[test]
    fn parses_models_and_engines_subcommands() {
        let cli = Cli::parse_from(["kiln", "models", "alias", "tinyllama", "tl"]);
        assert!(matches!(
            cli.command,
            Some(Command::Models {
                command: ModelsCommand::Alias { .. }
            })
        ));

        let cli = Cli::parse_from(["kiln", "engines", "install", "llamacpp"]);
        assert!(matches!(
            cli.command,
            Some(Command::Engines {
                command: EnginesCommand::Install { .. }
            })
        ));
    }

    #[test]
    fn user_input_errors_exit_2_fatal_errors_exit_1() {
        let bad = CoreError::Handle(kiln_types::HandleError::Empty);
        assert_eq!(exit_code_for(&bad), 2);

        let dup = CoreError::Model(ModelError::Duplicate {
            what: "alias",
            value: "x".into(),
        });
        assert_eq!(exit_code_for(&dup), 2);

        let fatal = CoreError::ServerStartFailed {
            addr: "127.0.0.1:3928".into(),
            timeout_secs: 30,
        };
        assert_eq!(exit_code_for(&fatal), 1);
    }
}
