use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use fieldoff::driver::{DriverError, MemberRef, Session};
use fieldoff::logging::{LogFormat, LogLevel, LogOptions, init_logging};
use fieldoff::target::TargetLayout;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LevelArg> for LogLevel {
    fn from(l: LevelArg) -> Self {
        match l {
            LevelArg::Error => LogLevel::Error,
            LevelArg::Warn => LogLevel::Warn,
            LevelArg::Info => LogLevel::Info,
            LevelArg::Debug => LogLevel::Debug,
            LevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text => LogFormat::Text,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "fieldoff", bin_name = "fieldoff", version)]
#[command(about = "Struct layout and member offsets for Cranelift targets")]
struct Cli {
    /// Log verbosity (overrides FIELDOFF_LOG_LEVEL)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LevelArg>,

    /// Log output format (overrides FIELDOFF_LOG_FORMAT)
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<FormatArg>,

    /// Target triple to lay out for [default: host]
    #[arg(long, global = true, value_name = "TRIPLE")]
    target: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print size, alignment and member offsets of declared structs
    #[command(after_help = r#"EXAMPLES:
  fieldoff layout decls.fo
  fieldoff layout decls.fo --struct Point --target i686-unknown-linux-gnu"#)]
    Layout {
        file: PathBuf,

        /// Only print this struct
        #[arg(long = "struct", value_name = "NAME")]
        only: Option<String>,
    },

    /// Print the byte offset of one member
    #[command(after_help = r#"EXAMPLES:
  fieldoff offsetof decls.fo Point y
  fieldoff offsetof decls.fo Point '#1' --emit-clif"#)]
    Offsetof {
        file: PathBuf,

        #[arg(value_name = "STRUCT")]
        strukt: String,

        /// Member name, or `#N` for the N-th member (0-based)
        #[arg(value_name = "MEMBER")]
        member: MemberRef,

        /// Print a Cranelift function returning the offset instead
        #[arg(long)]
        emit_clif: bool,
    },

    /// Write an object file exporting `S__sizeof` and `S__offsetof__m` functions
    Build {
        file: PathBuf,

        #[arg(short = 'o', long = "output", value_name = "OUT")]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(
        LogOptions::from_env()
            .with_overrides(cli.log_format.map(Into::into), cli.log_level.map(Into::into)),
    );

    let target = match &cli.target {
        Some(triple) => TargetLayout::parse(triple),
        None => TargetLayout::host(),
    };
    let target = match target {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    match run(cli.command, target) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(target: "pipeline", error = ?e, "failed");
            eprintln!("{e}");
            ExitCode::from(1)
        }
    }
}

fn run(command: Command, target: TargetLayout) -> Result<(), DriverError> {
    match command {
        Command::Layout { file, only } => {
            let session = Session::load(&file, target)?;
            print!("{}", session.render_layout(only.as_deref())?);
        }
        Command::Offsetof {
            file,
            strukt,
            member,
            emit_clif,
        } => {
            let session = Session::load(&file, target)?;
            if emit_clif {
                print!("{}", session.emit_clif(&strukt, &member)?);
            } else {
                println!("{}", session.offset_of(&strukt, &member)?.offset);
            }
        }
        Command::Build { file, output } => {
            let session = Session::load(&file, target)?;
            let written = session.write_object(&output)?;
            info!(target: "pipeline", out = %output.display(), bytes = written, "object written");
        }
    }
    Ok(())
}
