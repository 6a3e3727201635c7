use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xbench_sweep::version::resolve_version;
use xbench_sweep::{
    ArchiveDir, FailurePolicy, InstallStrategy, ProcessRunner, SweepConfig,
    SweepReport, SweepRunner, VersionId, VersionStatus,
};

fn config_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("config")
            .long("config")
            .short('c')
            .value_parser(value_parser!(PathBuf))
            .help("Configuration file (default: <root>/xbench-sweep.toml if present)"),
    )
    .arg(
        Arg::new("root")
            .long("root")
            .value_parser(value_parser!(PathBuf))
            .help("Root directory holding the benchmark project"),
    )
}

fn cli() -> Command {
    Command::new("xbench-sweep")
        .version(xbench_sweep::VERSION)
        .about("Benchmark successive versions of a library")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug output, including captured tool output"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            config_args(Command::new("run"))
                .about("Run the full sweep")
                .arg(
                    Arg::new("versions")
                        .long("version")
                        .value_name("REF")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(VersionId))
                        .help("Version to sweep; repeat to override the configured list"),
                )
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .value_parser(["source", "package"])
                        .help("Install strategy"),
                )
                .arg(
                    Arg::new("channel")
                        .long("channel")
                        .help("Package channel for the package strategy"),
                )
                .arg(
                    Arg::new("keep-going")
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Record failing versions and continue with the next"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the JSON sweep report to this file"),
                ),
        )
        .subcommand(
            config_args(Command::new("init"))
                .about("Initialize the environment and reset the archive"),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the release version recorded in a header")
                .arg(
                    Arg::new("header")
                        .long("header")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Header defining <PREFIX>_VERSION_MAJOR/MINOR/PATCH"),
                )
                .arg(
                    Arg::new("prefix")
                        .long("prefix")
                        .default_value("XTENSOR")
                        .help("Macro prefix of the version constants"),
                ),
        )
        .subcommand(
            config_args(Command::new("status"))
                .about("Compare archived results with the configured versions"),
        )
        .subcommand(
            config_args(Command::new("config")).about("Print the effective configuration"),
        )
}

fn init_tracing(verbose: bool, json: bool) {
    // the binary shares the library's crate name, so one directive covers both
    let default = if verbose {
        "xbench_sweep=debug"
    } else {
        "xbench_sweep=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn load_config(args: &ArgMatches) -> Result<SweepConfig> {
    let root = args.get_one::<PathBuf>("root");
    let config = match (args.get_one::<PathBuf>("config"), root) {
        (Some(path), _) => SweepConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        (None, Some(root)) => SweepConfig::discover(root)?,
        (None, None) => SweepConfig::discover(".")?,
    };

    match root {
        Some(root) => {
            let root = std::fs::canonicalize(root)
                .with_context(|| format!("root directory {} not found", root.display()))?;
            Ok(config.with_root(root))
        }
        None => Ok(config),
    }
}

/// Apply `run` flags on top of the loaded configuration
fn apply_run_overrides(args: &ArgMatches, mut config: SweepConfig) -> Result<SweepConfig> {
    if let Some(versions) = args.get_many::<VersionId>("versions") {
        config = config.with_versions(versions.cloned().collect());
    }
    let channel = args.get_one::<String>("channel").cloned();
    match (args.get_one::<String>("strategy").map(String::as_str), channel) {
        (Some("source"), Some(_)) => bail!("--channel only applies to --strategy package"),
        (Some("source"), None) => config = config.with_strategy(InstallStrategy::Source),
        (Some("package"), Some(channel)) | (None, Some(channel)) => {
            config = config.with_strategy(InstallStrategy::Package { channel });
        }
        (Some("package"), None) => {
            if !matches!(config.install, InstallStrategy::Package { .. }) {
                config = config.with_strategy(InstallStrategy::package());
            }
        }
        _ => {}
    }
    if args.get_flag("keep-going") {
        config = config.with_failure_policy(FailurePolicy::Continue);
    }
    Ok(config)
}

fn run(args: &ArgMatches) -> Result<bool> {
    let config = apply_run_overrides(args, load_config(args)?)?;
    let report = SweepRunner::new(config, ProcessRunner::new()).run()?;
    print_summary(&report);

    if let Some(path) = args.get_one::<PathBuf>("report") {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        tracing::info!("report written to {}", path.display());
    }
    Ok(report.is_success())
}

fn print_summary(report: &SweepReport) {
    println!(
        "Sweep of {} versions into {} ({} install, {}s)",
        report.outcomes.len(),
        report.environment.prefix.display(),
        report.strategy,
        report.duration().num_seconds()
    );
    for outcome in &report.outcomes {
        let resolved = outcome
            .resolved
            .map_or_else(|| "?".to_string(), |v| v.to_string());
        match outcome.status {
            VersionStatus::Archived => println!(
                "  ok      {:<12} {:<10} {}",
                outcome.version,
                resolved,
                outcome.archive_path().map_or_else(String::new, |p| p.display().to_string())
            ),
            VersionStatus::Failed => println!(
                "  FAILED  {:<12} {:<10} {}",
                outcome.version,
                resolved,
                outcome.error.as_deref().unwrap_or_default()
            ),
        }
    }
}

fn init(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let handle = SweepRunner::new(config, ProcessRunner::new()).initialize()?;
    println!("{}", handle.prefix.display());
    Ok(())
}

fn resolve(args: &ArgMatches) -> Result<()> {
    let header = args
        .get_one::<PathBuf>("header")
        .context("--header is required")?;
    let prefix = args
        .get_one::<String>("prefix")
        .map_or("XTENSOR", String::as_str);
    let version = resolve_version(header, prefix)
        .with_context(|| format!("failed to resolve {}", header.display()))?;
    println!("{version}");
    Ok(())
}

fn status(args: &ArgMatches) -> Result<bool> {
    let config = load_config(args)?;
    let archive = ArchiveDir::new(config.paths().archive);
    let mismatch = archive.verify(&config.versions)?;

    println!("Archive: {}", archive.path().display());
    for version in &config.versions {
        let path = archive.entry_path(version);
        if path.is_file() {
            println!("  {:<12} {}", version, path.display());
        } else {
            println!("  {version:<12} missing");
        }
    }
    for stray in &mismatch.unexpected {
        println!("  {stray:<12} not in version list");
    }
    Ok(mismatch.is_exact())
}

fn show_config(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn dispatch(matches: &ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("run", args)) => run(args),
        Some(("init", args)) => init(args).map(|()| true),
        Some(("resolve", args)) => resolve(args).map(|()| true),
        Some(("status", args)) => status(args),
        Some(("config", args)) => show_config(args).map(|()| true),
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"), matches.get_flag("log-json"));

    if !dispatch(&matches)? {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn run_collects_repeated_versions() {
        let matches = cli()
            .try_get_matches_from([
                "xbench-sweep",
                "run",
                "--version",
                "master",
                "--version",
                "0.14.0",
                "--keep-going",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let versions: Vec<&VersionId> = args.get_many::<VersionId>("versions").unwrap().collect();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].as_str(), "0.14.0");
        assert!(args.get_flag("keep-going"));
    }

    #[test]
    fn run_rejects_unsafe_version() {
        let result = cli().try_get_matches_from(["xbench-sweep", "run", "--version", "a/../b"]);
        assert!(result.is_err());
    }

    #[test]
    fn run_accepts_nested_branch() {
        let matches = cli()
            .try_get_matches_from(["xbench-sweep", "run", "--version", "release/0.20"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let config = apply_run_overrides(args, SweepConfig::new()).unwrap();
        assert_eq!(config.versions[0].archive_file_name(), "release__0.20.csv");
    }

    fn overrides(flags: &[&str], config: SweepConfig) -> Result<SweepConfig> {
        let argv = ["xbench-sweep", "run"].into_iter().chain(flags.iter().copied());
        let matches = cli().try_get_matches_from(argv).unwrap();
        let (_, args) = matches.subcommand().unwrap();
        apply_run_overrides(args, config)
    }

    #[test]
    fn channel_is_rejected_with_source_strategy() {
        let err = overrides(&["--strategy", "source", "--channel", "x"], SweepConfig::new())
            .unwrap_err();
        assert!(err.to_string().contains("--channel"));
    }

    #[test]
    fn package_strategy_keeps_configured_channel() {
        let configured = SweepConfig::new().with_strategy(InstallStrategy::Package {
            channel: "quantstack".to_string(),
        });
        let config = overrides(&["--strategy", "package"], configured).unwrap();
        assert_eq!(
            config.install,
            InstallStrategy::Package {
                channel: "quantstack".to_string()
            }
        );

        let config = overrides(&["--strategy", "package"], SweepConfig::new()).unwrap();
        assert_eq!(config.install, InstallStrategy::package());
    }

    #[test]
    fn bare_channel_implies_package_strategy() {
        let config = overrides(&["--channel", "quantstack"], SweepConfig::new()).unwrap();
        assert_eq!(
            config.install,
            InstallStrategy::Package {
                channel: "quantstack".to_string()
            }
        );
    }

    #[test]
    fn overrides_leave_config_alone_without_flags() {
        let config = overrides(&[], SweepConfig::new()).unwrap();
        assert_eq!(config.install, InstallStrategy::Source);
        assert_eq!(config.on_failure, FailurePolicy::Abort);
        assert_eq!(config.versions.len(), 2);

        let config = overrides(&["--keep-going", "--version", "0.14.0"], SweepConfig::new())
            .unwrap();
        assert_eq!(config.on_failure, FailurePolicy::Continue);
        assert_eq!(config.versions, vec![VersionId::new("0.14.0").unwrap()]);
    }

    #[test]
    fn verbose_is_global() {
        let matches = cli()
            .try_get_matches_from(["xbench-sweep", "status", "-v"])
            .unwrap();
        assert!(matches.get_flag("verbose"));
    }

    #[test]
    fn resolve_prints_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("xtensor_config.hpp");
        std::fs::write(
            &header,
            "#define XTENSOR_VERSION_PATCH 4\n#define XTENSOR_VERSION_MAJOR 0\n#define XTENSOR_VERSION_MINOR 15\n",
        )
        .unwrap();

        let matches = cli()
            .try_get_matches_from(["xbench-sweep", "resolve", "--header", header.to_str().unwrap()])
            .unwrap();
        assert!(dispatch(&matches).unwrap());
    }
}
