use std::process::ExitCode;

fn main() -> ExitCode {
    match upright_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("upright: {e}");
            ExitCode::FAILURE
        }
    }
}
