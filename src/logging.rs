//! Pretty-printing messages to the console

use colored::Colorize;

/// Pretty-print an error message to the console
pub fn error(error_message: String) {
    let error_title = "error:".red().bold();
    eprintln!("{} {}", error_title, error_message);
}

/// Pretty-print a status message to the console
pub fn info(message: String) {
    let info_title = "info:".green().bold();
    println!("{} {}", info_title, message);
}
