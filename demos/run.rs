//! Assembles and runs a program file.
//!
//! `cargo run --example run -- demos/programs/sum.asm [memory size]`

use std::env;
use std::fs;

use color_eyre::eyre::{eyre, Result, WrapErr};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use stack_cpu::machine::{Config, Machine};

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().with_level(LevelFilter::Info).init().unwrap(); // logging

    let mut args = env::args().skip(1);
    let path = args.next().ok_or_else(|| eyre!("usage: run <program.asm> [memory size]"))?;
    let config = match args.next() {
        Some(size) => Config::new(size.parse().wrap_err("memory size is not a number")?)?,
        None => Config::default(),
    };

    let source = fs::read_to_string(&path).wrap_err_with(|| format!("failed to read {}", path))?;

    let mut machine = Machine::new(config);
    machine.load_source(&source);
    machine.compile()?;
    machine.run()?;
    machine.memory().dump();

    println!("PC: {:?}", machine.pc());
    println!("Data stack: {:?}", machine.data_stack());
    println!("Return stack: {:?}", machine.return_stack());

    Ok(())
}
