fn main() {
    if let Err(err) = stackvault::cli::run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
