// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! shape_main - DDS shapes interoperability client on HDDS.
//!
//! Usage:
//!   shape_main -t Square -P -c RED
//!   shape_main -t Square -S -c RED -r -D l
//!
//! Exit codes: 0 on normal completion, 1 on invalid arguments, 2 when an
//! entity cannot be created or the run fails.

mod cli;

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hdds_shapes::transport::hdds::HddsTransport;
use hdds_shapes::{
    EnvConfig, EventListener, RunContext, RunSummary, Session, ShapeOptions, ShapesError,
    StdoutOutput,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cli::{is_informational, usage, Args};

const EXIT_ARGUMENTS: u8 = 1;
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let argv: Vec<String> = env::args().collect();
    let prog = argv.first().map_or("shape_main", String::as_str).to_string();

    let args = match Args::try_parse_from(&argv) {
        Ok(args) => args,
        Err(e) if is_informational(&e) => {
            println!("{}", e.to_string().trim_end());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            println!("{}", e.to_string().trim_end());
            println!("{}", usage(&prog));
            return ExitCode::from(EXIT_ARGUMENTS);
        }
    };
    if args.help {
        println!("{}", usage(&prog));
        return ExitCode::SUCCESS;
    }

    let env_config = EnvConfig::from_env();
    init_logging(args.verbose, &env_config.log_level);

    let options = match args.to_options(&env_config) {
        Ok(options) => options,
        Err(e) => {
            println!("{}", e);
            println!("{}", usage(&prog));
            return ExitCode::from(EXIT_ARGUMENTS);
        }
    };
    if options.color_defaulted {
        println!("warning: color was not specified, defaulting to \"BLUE\"");
    }
    debug!("arguments parsed: {:?}", options);

    match run(&options, &env_config) {
        Ok(summary) => {
            info!("{:?}", summary);
            println!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            let code = e
                .downcast_ref::<ShapesError>()
                .map_or(EXIT_FAILURE, |err| err.exit_code() as u8);
            ExitCode::from(code)
        }
    }
}

/// Logs go to stderr; stdout belongs to the harness protocol.
fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(options: &ShapeOptions, env_config: &EnvConfig) -> anyhow::Result<RunSummary> {
    let ctx = Arc::new(RunContext::from_config(env_config));
    let handler_ctx = Arc::clone(&ctx);
    ctrlc::set_handler(move || handler_ctx.request_shutdown())?;

    let transport = HddsTransport::new();
    let mut out = StdoutOutput;
    let mut session = Session::new(&transport).with_listener(EventListener::stdout());

    session.initialize(options, &mut out)?;
    info!("{:?} initialized", options.role);

    let summary = session.run(options, &ctx, &mut out)?;
    session.shutdown();
    Ok(summary)
}
