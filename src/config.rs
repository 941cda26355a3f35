use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::core::format::DEFAULT_HELPER_PATH;

/// Scratch log the helper writes while formatting
pub const SCRATCH_LOG: &str = "/tmp/formatusb.log";

#[derive(Parser, Debug)]
#[command(version, about = "Erase and reformat removable drives", long_about = None)]
pub struct Args {
    /// Path of the privileged formatting helper
    #[arg(long, default_value = DEFAULT_HELPER_PATH)]
    pub helper: PathBuf,

    /// Also list fixed (non-removable) drives
    #[arg(short = 'a', long)]
    pub show_all: bool,

    /// List partitions instead of whole disks
    #[arg(short = 'p', long)]
    pub show_partitions: bool,

    /// Initial volume label
    #[arg(short = 'l', long, default_value_t = String::from("USB-DATA"))]
    pub label: String,

    /// Print the device list and exit
    #[arg(long)]
    pub list: bool,

    /// With --list, print JSON instead of text
    #[arg(long, requires = "list")]
    pub json: bool,

    #[arg(long, value_enum, default_value_t = LoggingLevel::Info)]
    pub log_level: LoggingLevel,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LoggingLevel::Error => "error",
            LoggingLevel::Warn => "warn",
            LoggingLevel::Info => "info",
            LoggingLevel::Debug => "debug",
            LoggingLevel::Trace => "trace",
        }
    }
}

pub struct Config {
    pub helper: PathBuf,
    pub show_all: bool,
    pub show_partitions: bool,
    pub label: String,
    pub list_only: bool,
    pub json: bool,
    pub log_level: LoggingLevel,
    pub scratch_log: PathBuf,
}

impl Config {
    pub fn new(args: Args) -> Result<Self> {
        if args.label.chars().count() > 32 {
            anyhow::bail!("Label '{}' is longer than any supported filesystem allows", args.label);
        }

        Ok(Self {
            helper: args.helper,
            show_all: args.show_all,
            show_partitions: args.show_partitions,
            label: args.label,
            list_only: args.list,
            json: args.json,
            log_level: args.log_level,
            scratch_log: PathBuf::from(SCRATCH_LOG),
        })
    }
}
