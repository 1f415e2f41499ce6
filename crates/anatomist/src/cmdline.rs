//! Windows command-line tokenizer (`CommandLineToArgvW` rules).
//!
//! Spaces and tabs separate arguments outside quotes. A run of `2n`
//! backslashes before a quote yields `n` backslashes and toggles quoting;
//! `2n + 1` yields `n` backslashes and a literal quote. Backslashes not
//! followed by a quote are literal. `""` inside a quoted run is a literal quote.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandLineError {
    #[error("unterminated quote in command line")]
    UnterminatedQuote,
}

pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandLineError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' if !quoted => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\\' => {
                in_arg = true;
                let mut slashes = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    slashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    current.extend(std::iter::repeat('\\').take(slashes / 2));
                    if slashes % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    current.extend(std::iter::repeat('\\').take(slashes));
                }
            }
            '"' => {
                in_arg = true;
                if quoted && chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    quoted = !quoted;
                }
            }
            other => {
                in_arg = true;
                current.push(other);
            }
        }
    }

    if quoted {
        return Err(CommandLineError::UnterminatedQuote);
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}
