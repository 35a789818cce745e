use std::env;
use friscvm::logging::error;
use friscvm::simulator::{DEFAULT_MEMORY_SIZE_BYTES, Simulator};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <program.p> [memory-bytes]", args[0]);
        std::process::exit(1);
    }

    let memory_bytes = match args.get(2) {
        Some(text) => text.parse().unwrap_or_else(|_| {
            error(format!("invalid memory size \"{}\"", text));
            std::process::exit(1);
        }),
        None => DEFAULT_MEMORY_SIZE_BYTES,
    };

    let mut simulator = Simulator::new(memory_bytes);
    simulator.load(&args[1]).unwrap_or_else(|e| {
        error(e.to_string());
        std::process::exit(2);
    });

    if let Err(e) = simulator.run() {
        error(e.to_string());
        println!("state: {}", simulator.state());
        std::process::exit(3);
    }

    for name in ["R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "PC", "SR"] {
        if let Some(value) = simulator.read_register(name) {
            println!("{:>2}: 0x{:08X}", name, value);
        }
    }
    println!("state: {}", simulator.state());
}
