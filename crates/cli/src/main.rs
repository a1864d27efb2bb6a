fn main() {
    exhibit_cli::init_logging();

    if let Err(error) = exhibit_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
