use dlm_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    if let Err(err) = Cli::run_from_args().await {
        eprintln!("dlm error: {:#}", err);
        std::process::exit(1);
    }
}
