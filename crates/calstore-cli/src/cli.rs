use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calstore", about = "Calendar datastore administration", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store configuration (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the configured data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List calendar homes
    Homes,
    /// List the calendars of a home
    Calendars(CalendarsArgs),
    /// List the objects of a calendar
    Objects(ObjectsArgs),
    /// Migrate homes from a legacy directory tree
    Migrate(MigrateArgs),
    /// Run one JSON command read from stdin
    Gateway,
}

#[derive(Args)]
pub struct CalendarsArgs {
    pub uid: String,
}

#[derive(Args)]
pub struct ObjectsArgs {
    pub uid: String,
    pub calendar: String,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Root of the legacy tree (`<root>/<uid>/<calendar>/<name>.ics`)
    #[arg(long)]
    pub legacy_root: PathBuf,
    /// Homes to migrate; every home under the root when omitted
    #[arg(long = "uid")]
    pub uids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_homes() {
        let cli = Cli::try_parse_from(["calstore", "homes"]).unwrap();
        assert!(matches!(cli.command, Command::Homes));
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_calendars_with_config() {
        let cli = Cli::try_parse_from(["calstore", "--config", "/etc/calstore.toml", "calendars", "uid1"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/calstore.toml")));
        if let Command::Calendars(args) = cli.command {
            assert_eq!(args.uid, "uid1");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_objects() {
        let cli = Cli::try_parse_from(["calstore", "objects", "uid1", "calendar"]).unwrap();
        if let Command::Objects(args) = cli.command {
            assert_eq!(args.calendar, "calendar");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_migrate_uids() {
        let cli = Cli::try_parse_from([
            "calstore", "migrate", "--legacy-root", "/srv/legacy", "--uid", "home1", "--uid", "home2",
        ])
        .unwrap();
        if let Command::Migrate(args) = cli.command {
            assert_eq!(args.legacy_root, PathBuf::from("/srv/legacy"));
            assert_eq!(args.uids, vec!["home1", "home2"]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn migrate_requires_root() {
        assert!(Cli::try_parse_from(["calstore", "migrate"]).is_err());
    }

    #[test]
    fn parse_gateway_json() {
        let cli = Cli::try_parse_from(["calstore", "--format", "json", "gateway"]).unwrap();
        assert!(matches!(cli.command, Command::Gateway));
        assert!(matches!(cli.format, OutputFormat::Json));
    }

    #[test]
    fn parse_data_dir_after_subcommand() {
        let cli = Cli::try_parse_from(["calstore", "homes", "--data-dir", "/var/db/calstore"]).unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/var/db/calstore")));
    }
}
