use color_eyre::eyre::Result;

use log::LevelFilter;
use simple_logger::SimpleLogger;
use stack_cpu::machine::{Config, Machine};

const PROGRAM: &str = include_str!("programs/countdown.asm");

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().with_level(LevelFilter::Debug).init().unwrap(); // logging

    let mut machine = Machine::new(Config::from_block_index(0)?);
    machine.load_source(PROGRAM);
    machine.compile()?;
    machine.memory().dump();

    // single steps so every instruction shows up in the log
    while !machine.is_halted() {
        machine.step_into()?;
    }

    println!("Data stack: {:?}", machine.data_stack());

    Ok(())
}
