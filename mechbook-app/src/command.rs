use mechbook_shared::Decision;

/// One line typed at the session prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Show,
    Refresh,
    Respond(Decision),
    VerifyMeet(String),
    RequestCompletion,
    VerifyCompletion(String),
    EnableLocation,
    Review { rating: u8, comment: Option<String> },
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head {
            "" | "show" => Ok(Command::Show),
            "refresh" => Ok(Command::Refresh),
            "accept" => Ok(Command::Respond(Decision::Accepted)),
            "decline" => Ok(Command::Respond(Decision::Declined)),
            "meet" => Ok(Command::VerifyMeet(rest.to_string())),
            "request-code" => Ok(Command::RequestCompletion),
            "complete" => Ok(Command::VerifyCompletion(rest.to_string())),
            "location" => Ok(Command::EnableLocation),
            "review" => {
                let (rating, comment) = match rest.split_once(char::is_whitespace) {
                    Some((rating, comment)) => (rating, Some(comment.to_string())),
                    None => (rest, None),
                };
                let rating = rating
                    .parse::<u8>()
                    .map_err(|_| format!("Rating must be a number, got '{}'", rating))?;
                Ok(Command::Review { rating, comment })
            }
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }
}
