mod peer;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::{Session, SettingsProfile};

struct Options {
    profile: SettingsProfile,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: cs-ranging-emulator [--profile <auto|manual>] [--transcript <path>]"
        );
        process::exit(2);
    });

    let mut session = Session::new(options.profile, options.transcript.as_deref())?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&mut session, stdin.lock(), stdout.lock())
}

/// Runs the prompt loop until end of input or `exit`.
fn serve<R, W>(session: &mut Session, mut reader: R, mut writer: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    writeln!(
        writer,
        "CS ranging emulator ({} negotiation). `help` lists commands, `exit` quits.",
        session.profile().tag()
    )?;

    let mut line = String::new();
    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            return Ok(());
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if should_terminate(input) {
            writeln!(writer, "bye")?;
            return Ok(());
        }

        for response in session.handle_command(input)? {
            writeln!(writer, "{response}")?;
        }
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        profile: SettingsProfile::Auto,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = SettingsProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args
                .next()
                .ok_or_else(|| "Expected value after --profile".to_string())?;
            options.profile = SettingsProfile::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--transcript=") {
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args
                .next()
                .ok_or_else(|| "Expected path after --transcript".to_string())?;
            options.transcript = Some(PathBuf::from(value));
        } else {
            options.profile = SettingsProfile::from_tag(&arg)?;
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_a_scripted_session() {
        let mut session = Session::new(SettingsProfile::Auto, None).expect("session");
        let script = b"connect 1 central\n\nstatus\nquit\nstatus\n";
        let mut output = Vec::new();
        serve(&mut session, &script[..], &mut output).expect("serve");

        let output = String::from_utf8(output).expect("utf8");
        assert!(output.starts_with("CS ranging emulator (auto negotiation)."));
        assert!(output.contains("conn 1 central/initiator"));
        assert!(output.trim_end().ends_with("bye"));
    }
}
