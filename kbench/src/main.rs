//! kbench command-line entry point

fn main() {
    // The error chain is already logged by the driver.
    if kbench::run().is_err() {
        std::process::exit(1);
    }
}
