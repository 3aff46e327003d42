use clap::{Parser, Subcommand};
use bimforge::cli;
use bimforge::error::BimResult;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bimforge")]
#[command(about = "Convert Tableau workbooks into Power BI semantic models (Model.bim).")]
#[command(long_about = "bimforge - Tableau workbook to Power BI Model.bim converter

Reads the data model of a .twb workbook (tables, columns, relationships,
calculated fields), translates calculations to DAX and writes a tabular
model document with measures placed on their base tables.

COMMANDS:
  translate  - Translate a single formula to DAX
  calcs      - Translate every calculation of a workbook to a JSON file
  convert    - Convert a workbook to <name>_Model.bim
  batch      - Convert every workbook in a directory in parallel
  clean      - Strip source-file annotations from a calculation file
  validate   - Check written Model.bim files

EXAMPLES:
  bimforge translate \"{FIXED [Region]: SUM([Revenue])}\" --table Sales
  bimforge calcs Superstore.twb -o calcs.json
  bimforge convert Superstore.twb -o out --calcs calcs.json --report
  bimforge batch workbooks/ -o out

Logging is controlled by RUST_LOG (default: bimforge=info).")]
#[command(version)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate a single formula to DAX
    Translate {
        /// Source formula, e.g. "SUM([Sales])"
        formula: String,

        /// Table used to qualify bare column references
        #[arg(short, long)]
        table: Option<String>,

        /// Converter configuration (YAML)
        #[arg(short, long, env = "BIMFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Translate every calculation of a workbook into a calculation file
    Calcs {
        /// Path to the .twb workbook
        input: PathBuf,

        /// Output JSON file (default: <workbook>_dax_calculations.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Default table for bare column references
        #[arg(short, long)]
        table: Option<String>,

        #[arg(short, long, env = "BIMFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    #[command(long_about = "Convert a workbook to a Model.bim document.

Writes <workbook>_Model.bim into the output directory. Workbook
calculations are translated and attached as measures unless
--no-measures is given. A calculation file from an earlier 'calcs'
run can be attached with --calcs; its measures replace workbook
measures of the same name unless the configuration disables it.

Validation findings are printed but never stop the conversion.")]
    /// Convert a workbook to <name>_Model.bim
    Convert {
        /// Path to the .twb workbook
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Calculation file to attach
        #[arg(long)]
        calcs: Option<PathBuf>,

        /// Also write a markdown conversion report
        #[arg(long)]
        report: bool,

        /// Do not attach workbook calculations as measures
        #[arg(long)]
        no_measures: bool,

        #[arg(short, long, env = "BIMFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Convert every workbook in a directory
    Batch {
        /// Directory holding the workbooks
        dir: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Workbook file extension
        #[arg(short, long, default_value = "twb")]
        pattern: String,

        #[arg(short, long, env = "BIMFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Strip source-file annotations from a calculation file in place
    Clean {
        /// Calculation file (JSON)
        file: PathBuf,

        #[arg(short, long, env = "BIMFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate Model.bim files
    Validate {
        /// Model file(s) to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "bimforge=debug" } else { "bimforge=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> BimResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Translate {
            formula,
            table,
            config,
        } => cli::translate(formula, table, config),

        Commands::Calcs {
            input,
            output,
            table,
            config,
        } => cli::calcs(input, output, table, config),

        Commands::Convert {
            input,
            output,
            calcs,
            report,
            no_measures,
            config,
        } => cli::convert(input, output, calcs, report, no_measures, config),

        Commands::Batch {
            dir,
            output,
            pattern,
            config,
        } => cli::batch(dir, output, pattern, config),

        Commands::Clean { file, config } => cli::clean(file, config),

        Commands::Validate { files } => cli::validate(files),
    }
}
