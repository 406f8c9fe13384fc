use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "healthpost")]
#[command(about = "Record inventory and patient visits offline, then sync when connected")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the device database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Medicine inventory
    #[command(subcommand, alias = "inv")]
    Inventory(InventoryCommands),
    /// Maternal and child patient register
    #[command(subcommand)]
    Patient(PatientCommands),
    /// Inspect or edit the pending sync queue
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Submit pending operations to the server
    Sync {
        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum InventoryCommands {
    /// Add a medicine item
    Add {
        /// Item name
        name: String,
        /// Units in stock
        #[arg(long)]
        stock: i64,
        /// Low-stock warning threshold
        #[arg(long, default_value = "0")]
        threshold: i64,
        /// Expiry date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        expiry: String,
    },
    /// Change fields of a synced item
    Update {
        /// Server id of the item
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        stock: Option<i64>,
        #[arg(long)]
        threshold: Option<i64>,
        /// Expiry date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        expiry: Option<String>,
    },
    /// Delete a synced item
    Delete {
        /// Server id of the item
        id: i64,
    },
    /// List items on this device
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PatientCommands {
    /// Register a patient visit, optionally dispensing medicine
    #[command(alias = "add")]
    Register {
        /// Patient name
        name: String,
        /// Register the patient belongs to
        #[arg(long = "type", value_enum)]
        patient_type: PatientTypeArg,
        /// Server id of the dispensed inventory item
        #[arg(long, value_name = "ID")]
        medicine_id: Option<i64>,
        /// Units dispensed
        #[arg(long, requires = "medicine_id")]
        quantity: Option<i64>,
        /// Register field as KEY=VALUE (VALUE may be JSON), repeatable
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Change fields of a synced patient
    Update {
        /// Server id of the patient
        id: i64,
        #[arg(long)]
        name: Option<String>,
        /// Register field as KEY=VALUE (VALUE may be JSON), repeatable
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Delete a synced patient
    Delete {
        /// Server id of the patient
        id: i64,
    },
    /// List patients on this device
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show pending operations in submission order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a pending operation and revert its local effect
    Discard {
        /// Local queue id
        local_id: i64,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PatientTypeArg {
    Maternal,
    Child,
}

impl PatientTypeArg {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Maternal => "maternal",
            Self::Child => "child",
        }
    }
}
