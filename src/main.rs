fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = inkwell::cli::Args::parse();
    if let Err(e) = inkwell::logging::init(args.verbose) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }
    if let Err(e) = inkwell::cli::run(&args) {
        eprintln!("Error: {}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
