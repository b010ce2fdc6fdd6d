//! Donation Kit checkout replay CLI
//!
//! Loads a store directory, replays checkout events through the transaction
//! coordinator and prints the redemptions that are still active.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- directory.csv checkout.csv > redemptions.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `DONATION_USER_ID`: Shopper identity; without it every begin is rejected
//! - `DONATION_ENV`: `production` (default) or `staging`
//! - `DONATION_PROXY_AMOUNT`: Placeholder cart amount for proxy transactions

use donation_kit::memory::StaticIdentity;
use donation_kit::{CheckoutReplay, ReplayError, SdkConfig};
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;

const USER_ID_VAR: &str = "DONATION_USER_ID";

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), ReplayError> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return Err(ReplayError::MissingArgument);
    }

    let config = SdkConfig::from_env()?;
    let user_id = env::var(USER_ID_VAR).ok();

    let directory = CheckoutReplay::load_directory(BufReader::new(File::open(&args[1])?))?;
    let mut replay = CheckoutReplay::new(config, StaticIdentity::new(user_id.as_deref()), directory);
    replay
        .process_csv(BufReader::new(File::open(&args[2])?))
        .await?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    replay.write_output(handle)?;

    Ok(())
}
