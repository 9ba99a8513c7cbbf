//! kiln — entry point.
//!
//! One binary, three personalities:
//! 1. `--run_python_file <script> [py_home]` — exec mode: load the Python
//!    engine and delegate; never touches the catalog.
//! 2. `--start-server` / `start-server` — run the API server in the
//!    foreground (takes the data-root instance lock).
//! 3. Anything else — CLI commands over the same data root.
//!
//! Exit codes: 0 success, 1 unsupported host or fatal error, 2 bad input.

mod chat;
mod cli;
mod logging;
mod server;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use kiln_core::InitOptions;
use kiln_types::HostInfo;

use crate::cli::{Cli, Command};

fn main() -> ExitCode {
    let args = Cli::parse();

    // Stop immediately on hosts kiln does not support.
    if let Err(e) = HostInfo::detect(None) {
        eprintln!("{e}");
        return ExitCode::from(1);
    }

    // Request handling runs on a pool of at least one worker per logical
    // core.
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            error!(error = %e, "kiln failed");
            ExitCode::from(cli::exit_code_for(&e))
        }
    }
}

async fn run(args: Cli) -> Result<(), kiln_core::CoreError> {
    let server_mode = args.wants_server();
    let kiln = kiln_core::init(InitOptions {
        root: None,
        acquire_lock: server_mode,
    })?;

    let base = if server_mode {
        logging::SERVER_LOG_BASE
    } else {
        logging::CLI_LOG_BASE
    };
    let _log_guard = logging::init(&kiln.layout().logs_dir(), base, args.verbose);

    // Exec mode takes precedence over everything else.
    if let Some(script) = args.run_python_file.first() {
        let py_home = args.run_python_file.get(1).map(String::as_str).unwrap_or("");
        let result = kiln.run_python_file(script, py_home);
        kiln_core::shutdown();
        return result;
    }

    // serve() tears the process-wide instance down itself so the data-root
    // lock releases on every exit path.
    if server_mode {
        return server::serve(kiln)
            .await
            .map_err(|e| kiln_core::CoreError::Io(std::io::Error::other(e.to_string())));
    }

    let result = match args.command {
        Some(Command::StartServer) => unreachable!("handled as server mode"),
        Some(command) => cli::execute(kiln, command).await,
        None => {
            // No subcommand: print help, succeed.
            let mut cmd = <Cli as clap::CommandFactory>::command();
            let _ = cmd.print_help();
            Ok(())
        }
    };

    kiln_core::shutdown();
    result
}
