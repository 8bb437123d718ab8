// LNP Node: node running lightning network protocol and generalized lightning
// channels.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code
    // missing_docs,
)]

//! Command-line interface to LNP channel core

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate log;
#[macro_use]
extern crate clap;

mod command;
mod opts;

use clap::Parser;
use lnp_channel::LogStyle;

pub use crate::opts::{Command, Opts};

fn main() {
    println!("lnp-channel-cli: command-line tool for working with LNP channels");

    let opts = Opts::parse();
    let level = match opts.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    trace!("Command-line arguments: {:?}", opts);

    let config = match opts.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {}", "Unable to load configuration:".err(), err.err_details());
            std::process::exit(1);
        }
    };

    trace!("Executing command: {:?}", opts.command);
    opts.command
        .clone()
        .exec(&opts, &config)
        .unwrap_or_else(|err| eprintln!("{}", err.err()));
}
