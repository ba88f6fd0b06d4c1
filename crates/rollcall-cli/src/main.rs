use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or re-enroll) a person from the camera
    Enroll {
        /// Identity key (RUT-style, e.g. 12.345.678-9)
        #[arg(short, long)]
        identity: String,
        /// Person's full name
        #[arg(short, long)]
        name: String,
        /// Shift tag, e.g. "day" or "evening"
        #[arg(short, long, default_value = "day")]
        shift: String,
    },
    /// Run one live recognition pass for an event
    Recognize {
        /// Event id the attendance should be recorded against
        #[arg(short, long)]
        event: String,
        /// Restrict matching to one shift tag
        #[arg(short, long, default_value = "")]
        shift: String,
    },
    /// Verify the person at the camera against one enrolled identity
    Verify {
        /// Identity key to check against
        identity: String,
    },
    /// Show the in-flight enrollment capture progress
    Progress,
    /// List enrolled users
    List,
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, identity: &str, full_name: &str, shift: &str) -> zbus::Result<String>;
    async fn recognize(&self, event: &str, shift: &str) -> zbus::Result<String>;
    async fn verify(&self, identity: &str) -> zbus::Result<String>;
    async fn progress(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_users(&self) -> zbus::Result<String>;
}

/// Re-indent a JSON reply for the terminal; passes through anything that
/// does not parse.
fn print_report(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{raw}"),
        },
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::system()
        .await
        .context("could not connect to the system bus (is rollcalld running?)")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("could not reach rollcalld on the bus")?;

    match cli.command {
        Commands::Enroll {
            identity,
            name,
            shift,
        } => {
            println!("Enrolling {name} ({identity})... look at the camera");
            let report = proxy.enroll(&identity, &name, &shift).await?;
            print_report(&report);
        }
        Commands::Recognize { event, shift } => {
            let report = proxy.recognize(&event, &shift).await?;
            print_report(&report);
        }
        Commands::Verify { identity } => {
            let report = proxy.verify(&identity).await?;
            print_report(&report);
        }
        Commands::Progress => {
            let report = proxy.progress().await?;
            print_report(&report);
        }
        Commands::List => {
            let report = proxy.list_users().await?;
            print_report(&report);
        }
        Commands::Status => {
            let report = proxy.status().await?;
            print_report(&report);
        }
    }

    Ok(())
}
