use clap::Parser;
use log::{error, info};
use serve::{Controller, ServerConfig, logger};
use std::io::{self, BufReader};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = ServerConfig::parse();

    if let Err(e) = logger::init(&config) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting static file server with config: {:?}", config);

    let mut controller = Controller::new(io::stdout());
    match controller.run(&config, BufReader::new(io::stdin())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server terminated: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
