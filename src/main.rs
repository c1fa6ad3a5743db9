fn main() {
    std::process::exit(phasegate::cli::run_gate_check());
}
