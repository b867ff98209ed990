mod backup;
mod cli;
mod config;
mod error;
mod garmin;
mod logging;
mod util;

fn main() {
    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
