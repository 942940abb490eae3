pub mod commands;

use clap::{Parser, Subcommand};
use hrflow_core::workflow::ApprovalDecision;
use std::process::ExitCode;

use crate::commands::request::FileArgs;

#[derive(Debug, Parser)]
#[command(
    name = "hrflow",
    about = "hrflow operator CLI",
    long_about = "Operate the hrflow absence-approval workflow: migrations, demo data, requests, reminders and attendance.",
    after_help = "Examples:\n  hrflow doctor --json\n  hrflow request file --user u-emp-eng --type AL --start 2024-07-01 --end 2024-07-03\n  hrflow sweep"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo organization, policies and work locations")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, migration state and the HR approver pool")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Send one reminder for every overdue pending request")]
    Sweep,
    #[command(subcommand, about = "File and decide absence requests")]
    Request(RequestCommand),
    #[command(about = "Record a geofenced check-in")]
    CheckIn {
        #[arg(long)]
        user: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    #[command(about = "Close the open check-in")]
    CheckOut {
        #[arg(long)]
        user: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
}

#[derive(Debug, Subcommand)]
enum RequestCommand {
    #[command(about = "File a new absence request and route it to its first approver")]
    File(FileArgs),
    #[command(about = "Approve as the current approver")]
    Approve {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Reject as the current approver")]
    Reject {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long, help = "Reason shown to the requester")]
        comment: Option<String>,
    },
    #[command(about = "Withdraw a pending request as its requester")]
    Cancel {
        id: String,
        #[arg(long)]
        user: String,
    },
    #[command(about = "Show a request with its decision history")]
    Show { id: String },
    #[command(about = "List requests filed by a user, newest first")]
    List {
        #[arg(long)]
        user: String,
    },
    #[command(about = "List pending requests waiting on a user")]
    Inbox {
        #[arg(long)]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Sweep => commands::sweep::run(),
        Command::Request(request) => match request {
            RequestCommand::File(args) => commands::request::file(args),
            RequestCommand::Approve { id, user, comment } => {
                commands::request::decide(&id, &user, ApprovalDecision::Approved, comment)
            }
            RequestCommand::Reject { id, user, comment } => {
                commands::request::decide(&id, &user, ApprovalDecision::Rejected, comment)
            }
            RequestCommand::Cancel { id, user } => commands::request::cancel(&id, &user),
            RequestCommand::Show { id } => commands::request::show(&id),
            RequestCommand::List { user } => commands::request::list(&user),
            RequestCommand::Inbox { user } => commands::request::inbox(&user),
        },
        Command::CheckIn { user, lat, lon } => commands::attendance::check_in(&user, lat, lon),
        Command::CheckOut { user, lat, lon } => commands::attendance::check_out(&user, lat, lon),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
