//! The `rillc` binary.

use clap::error::ErrorKind;
use clap::Parser;

use rillc_drv::{init_tracing, run, Cli};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // help and version are not usage errors
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose);
    std::process::exit(run(&cli));
}
