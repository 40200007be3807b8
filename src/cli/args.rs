use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Pairs with a Xiaomi-style body composition scale and records its measurements", long_about = None)]
pub struct Args {
    /// Height in centimetres used for BMI. Overrides the config file.
    #[arg(long, global = true)]
    pub height_cm: Option<f64>,

    /// Log debug output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Find a scale, wait for a measurement and save it
    Pair {
        /// Connect to the scale with this address instead of the first one found
        #[arg(long)]
        address: Option<String>,

        /// Abdominal girth in centimetres to store with the measurement
        #[arg(long)]
        girth_cm: Option<f64>,

        /// Save the first measurement without asking
        #[arg(long, short)]
        yes: bool,
    },

    /// Save a measurement typed in by hand
    Manual {
        #[arg(long)]
        weight_kg: f64,

        #[arg(long)]
        girth_cm: Option<f64>,
    },

    /// Decode a captured weight-measurement payload, given as hex
    Decode {
        payload: String,
    },

    /// Run the pairing workflow against captured payloads instead of a real scale
    Replay {
        /// Notification values, as hex, in the order the scale sent them
        #[arg(required = true)]
        payloads: Vec<String>,

        /// Advertised name of the simulated scale
        #[arg(long, default_value = "MI_SCALE")]
        name: String,

        /// Save the resulting measurement
        #[arg(long)]
        save: bool,
    },

    /// Store settings in the config file. Use the global --height-cm to change the height
    Config {
        /// Seconds to wait for a measurement before falling back to manual entry
        #[arg(long)]
        measurement_timeout_secs: Option<u64>,

        /// Seconds to scan for scales
        #[arg(long)]
        scan_duration_secs: Option<u64>,

        /// Seconds a connection attempt may take
        #[arg(long)]
        connect_timeout_secs: Option<u64>,

        /// File measurements are appended to
        #[arg(long)]
        records_path: Option<PathBuf>,
    },
}

impl Action {
    /// Whether the command talks to a scale or writes a file, and so must be the only session running.
    pub fn needs_session_lock(&self) -> bool {
        match self {
            Action::Pair { .. } | Action::Manual { .. } | Action::Config { .. } => true,
            Action::Replay { save, .. } => *save,
            Action::Decode { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let args = Args::parse_from(["bodyscale-pairing", "pair", "--girth-cm", "92", "-y", "--height-cm", "181"]);

        assert_eq!(args.height_cm, Some(181.0));
        match args.action {
            Action::Pair { address, girth_cm, yes } => {
                assert_eq!(address, None);
                assert_eq!(girth_cm, Some(92.0));
                assert!(yes);
            },
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_replay_needs_payloads() {
        assert!(Args::try_parse_from(["bodyscale-pairing", "replay"]).is_err());
    }

    #[test]
    fn test_session_lock() {
        let lock = |argv: &[&str]| Args::parse_from(argv).action.needs_session_lock();

        assert!(lock(&["bodyscale-pairing", "pair"]));
        assert!(lock(&["bodyscale-pairing", "manual", "--weight-kg", "70"]));
        assert!(lock(&["bodyscale-pairing", "config", "--height-cm", "182"]));
        assert!(lock(&["bodyscale-pairing", "replay", "--save", "00"]));
        assert!(!lock(&["bodyscale-pairing", "replay", "00"]));
        assert!(!lock(&["bodyscale-pairing", "decode", "00"]));
    }
}
