use std::io::{self, BufRead, Write};

use clap::Parser;
use color_eyre::Result;
use log::info;

use radar_acquisition::{
    build_controller, run_acquisition, AcquisitionParams, ConfirmPrompt, SaveOutcome,
};

fn ask_on_terminal(prompt: &ConfirmPrompt) -> bool {
    print!("{}\n{} [y/N] ", prompt.title(), prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let params = AcquisitionParams::parse();
    params.pretty_print();

    let mut controller = build_controller(&params)?;
    let assume_yes = params.assume_yes;
    let mut confirm = |prompt: &ConfirmPrompt| assume_yes || ask_on_terminal(prompt);
    let outcomes = run_acquisition(&mut controller, &params, &mut confirm)?;

    let saved: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            SaveOutcome::Saved(report) => Some(report),
            SaveOutcome::Declined(_) => None,
        })
        .collect();
    for report in &saved {
        for file in &report.files {
            println!("{}", file.display());
        }
    }
    info!(
        "{} of {} captures saved, next counter {}",
        saved.len(),
        params.captures,
        controller.counter()
    );
    Ok(())
}
