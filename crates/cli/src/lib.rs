pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "procura",
    about = "Procura operator CLI",
    long_about = "Operate the Procura purchase-request database: migrations, demo organisation, readiness checks and department budgets.",
    after_help = "Examples:\n  procura migrate\n  procura seed\n  procura doctor --json\n  procura budget show --department dept-ops\n  procura budget set --department dept-ops --year 2026 --total 75000"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Load the demo organisation (departments, users, roles, reporting lines) and budgets"
    )]
    Seed {
        #[arg(long, help = "Fiscal year to create budgets for (defaults to the current one)")]
        year: Option<i32>,
    },
    #[command(about = "Validate config, database connectivity and applied migrations")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect or resize department budget envelopes")]
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },
}

#[derive(Debug, Subcommand)]
enum BudgetAction {
    #[command(about = "Show total, spent and remaining amounts for one department")]
    Show {
        #[arg(long)]
        department: String,
        #[arg(long, help = "Fiscal year (defaults to the current one)")]
        year: Option<i32>,
    },
    #[command(about = "Create or resize a budget; refuses totals below the amount already spent")]
    Set {
        #[arg(long)]
        department: String,
        #[arg(long)]
        year: i32,
        #[arg(long, help = "New total amount, e.g. 75000 or 75000.50")]
        total: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { year } => commands::seed::run(year),
        Command::Doctor { json } => {
            let (exit_code, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code, output }
        }
        Command::Budget { action: BudgetAction::Show { department, year } } => {
            commands::budget::show(&department, year)
        }
        Command::Budget { action: BudgetAction::Set { department, year, total } } => {
            commands::budget::set(&department, year, &total)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
