use std::env;
use friscvm::assembler;
use friscvm::logging::{error, info};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <input.a>", args[0]);
        std::process::exit(1);
    }

    let (message, ok) = assembler::assemble(&args[1]);
    if !ok {
        error(message);
        std::process::exit(2);
    }
    info(message);
}
