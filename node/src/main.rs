//! purechain-node: run the PureChain pipeline from the command line
//!
//! Every subcommand prints one JSON document on stdout. Pipeline failures
//! print the structured error response and exit with status 1.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use purechain_ledger::Ledger;
use purechain_node::{Config, Node};
use purechain_orchestrator::collaborators::AuditLog;
use purechain_orchestrator::{
    OrchestratorError, Sector, SubmissionQuery, SubmissionRequest, TrainingRequest,
    ValidationStatus,
};

#[derive(Parser)]
#[command(name = "purechain-node")]
#[command(about = "Submission and training runtime for the PureChain reputation ledger")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "purechain.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "PURECHAIN_DATA_DIR")]
    data_dir: Option<String>,

    /// Operator contact for low-performance alerts (overrides config file)
    #[arg(long, env = "PURECHAIN_OPERATOR")]
    operator: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a dataset and settle it on the ledger
    Submit {
        /// Contributor identity token
        #[arg(long, env = "PURECHAIN_TOKEN")]
        token: String,
        /// CSV or JSON dataset
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        sector: Sector,
        #[arg(long)]
        model_id: String,
        /// Human-readable dataset name
        #[arg(long)]
        label: Option<String>,
    },
    /// Train a model on every accepted contribution for it
    Train {
        #[arg(long)]
        model_id: String,
        #[arg(long)]
        sector: Sector,
        /// Ledger address to attribute the run to (defaults to the admin account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Show one ledger account
    Account { address: String },
    /// List submission records
    Submissions {
        #[arg(long)]
        model_id: Option<String>,
        #[arg(long)]
        sector: Option<Sector>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// List training runs, newest first
    Runs {
        #[arg(long)]
        model_id: Option<String>,
    },
    /// List mirrored ledger transactions
    Transactions {
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Valid,
    Invalid,
}

impl From<StatusArg> for ValidationStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Valid => ValidationStatus::Valid,
            StatusArg::Invalid => ValidationStatus::Invalid,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("purechain_node=info".parse()?)
                .add_directive("purechain_orchestrator=info".parse()?)
                .add_directive("purechain_ledger=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("Config file: {}", cli.config);

    let mut config = Config::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    if let Some(operator) = cli.operator {
        config.orchestrator.training.operator_contact = Some(operator);
    }

    info!("Data dir: {}", config.node.data_dir.display());

    let node = Node::open(&config).await?;

    match cli.command {
        Command::Submit {
            token,
            file,
            sector,
            model_id,
            label,
        } => {
            let bytes = tokio::fs::read(&file).await?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut request = SubmissionRequest::new(token, file_name, bytes, sector, model_id);
            if let Some(label) = label {
                request = request.with_label(label);
            }
            finish(node.submissions.handle(request).await)
        }
        Command::Train {
            model_id,
            sector,
            account,
        } => {
            let request = TrainingRequest {
                model_id,
                sector,
                triggering_account: account.unwrap_or_else(|| config.node.admin_account.clone()),
            };
            finish(node.training.train(request).await)
        }
        Command::Account { address } => print_json(&node.ledger.get_account(&address).await),
        Command::Submissions {
            model_id,
            sector,
            account,
            status,
        } => {
            let query = SubmissionQuery {
                status: status.map(Into::into),
                model_id,
                sector,
                account,
            };
            print_json(&node.audit.submissions(&query).await?)
        }
        Command::Runs { model_id } => print_json(&node.audit.training_runs(model_id.as_deref()).await?),
        Command::Transactions { account } => {
            print_json(&node.audit.transactions(account.as_deref()).await?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish<T: Serialize>(result: Result<T, OrchestratorError>) -> anyhow::Result<()> {
    match result {
        Ok(outcome) => print_json(&outcome),
        Err(e) => {
            print_json(&e.to_response())?;
            std::process::exit(1);
        }
    }
}
