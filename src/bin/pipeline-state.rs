fn main() {
    if let Err(e) = phasegate::cli::run_pipeline_state() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
