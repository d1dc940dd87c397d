pub mod seq;
pub mod sample;
pub mod ext;
pub mod command;

mod err;
pub use err::Error;

fn main() -> std::process::ExitCode {
    let args: Vec<_> = std::env::args().collect();
    command::run(&args[1..])
}
