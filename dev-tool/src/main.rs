use std::process::exit;

use anyhow::Error;
use structopt::StructOpt;

use crate::exit_code::FATAL_ERROR;

mod embed;
mod exit_code;
mod pool;
mod utils;

/// Tooling for the developers of the sentence embeddings.
#[derive(StructOpt, Debug)]
enum CommandArgs {
    Embed(embed::EmbedCmd),
    Pool(pool::PoolCmd),
}

impl CommandArgs {
    fn run(self) -> Result<i32, Error> {
        match self {
            CommandArgs::Embed(cmd) => cmd.run(),
            CommandArgs::Pool(cmd) => cmd.run(),
        }
    }
}

fn main() {
    env_logger::init();

    let exit_code = match CommandArgs::from_args().run() {
        Ok(exit_code) => exit_code,
        Err(error) => {
            eprintln!("{:?}", error);
            FATAL_ERROR
        }
    };

    exit(exit_code);
}
