use clap::{Parser as ClapParser, Subcommand};
use std::io::{self, Read};
use tsl_lang::cli::{self, CheckOptions, CheckResult, CliError, Dialect};

#[derive(ClapParser)]
#[command(name = "tsl")]
#[command(about = "TSL - compile time series queries to WarpScript or PromQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a TSL document and print the generated native query
    Check {
        /// The TSL document (reads from stdin if not provided)
        query: Option<String>,

        /// Target dialect: warp10 or prometheus
        #[arg(short, long, default_value = "warp10")]
        dialect: String,

        /// Opaque back-end token
        #[arg(short, long, default_value = "")]
        token: String,

        /// Line offset applied to reported error positions
        #[arg(long, default_value_t = 0)]
        line_start: i64,

        /// Default time range: a duration or "start[,end]"
        #[arg(long, default_value = "")]
        query_range: String,

        /// Implicit bucket count used by sample()
        #[arg(long, default_value = "")]
        samplers: String,

        /// Comma-separated native variable names bound by the caller
        #[arg(long, value_delimiter = ',')]
        variables: Vec<String>,

        /// Emit the stack authentication preamble (warp10 only)
        #[arg(long)]
        authenticate: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            query,
            dialect,
            token,
            line_start,
            query_range,
            samplers,
            variables,
            authenticate,
            json,
        } => run_check(
            query,
            dialect,
            token,
            line_start,
            query_range,
            samplers,
            variables,
            authenticate,
            json,
        ),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_check(
    query: Option<String>,
    dialect: String,
    token: String,
    line_start: i64,
    query_range: String,
    samplers: String,
    variables: Vec<String>,
    authenticate: bool,
    json: bool,
) -> Result<(), CliError> {
    let query = match query {
        Some(q) => q,
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(CliError::Io)?;
            buffer
        }
        None => return Err(CliError::NoInput),
    };

    let options = CheckOptions {
        query,
        dialect: Dialect::parse(&dialect)?,
        token,
        line_start,
        query_range,
        samplers,
        variables,
        authenticate,
    };

    match cli::execute_check(&options)? {
        CheckResult::WarpScript(warpscript) => {
            if json {
                let output = serde_json::json!({ "warpscript": warpscript });
                println!("{}", output);
            } else {
                print!("{}", warpscript);
            }
        }
        CheckResult::PromQl(queries) => {
            if json {
                let output: Vec<serde_json::Value> = queries
                    .iter()
                    .map(|ql| {
                        serde_json::json!({
                            "query": ql.query,
                            "start": ql.start,
                            "end": ql.end,
                            "step": ql.step,
                            "instant": ql.instant_query,
                            "url": ql.to_url(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(output));
            } else {
                for ql in &queries {
                    println!("{}", ql.to_url());
                }
            }
        }
    }
    Ok(())
}
