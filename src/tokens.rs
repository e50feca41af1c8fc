//! Разбор ответа модуля на строки-токены
//!
//! Field parsers work on these tokens instead of raw offsets into the
//! snapshot. A line is one of: a `+NAME: a,b,"c"` header with its field list,
//! a final result code, the `>` prompt, or free text (PDU, message body,
//! `SMS Ready`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Final {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Header { name: &'a str, fields: Fields<'a> },
    Final(Final),
    Prompt,
    Text(&'a str),
}

impl<'a> Token<'a> {
    /// `line` without its terminator
    pub fn from_line(line: &'a str) -> Self {
        let line = line.trim();
        match line {
            "OK" => Token::Final(Final::Ok),
            "ERROR" => Token::Final(Final::Error),
            ">" => Token::Prompt,
            _ if line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") => {
                Token::Final(Final::Error)
            }
            _ if line.starts_with('+') => match line.find(':') {
                Some(colon) => Token::Header {
                    name: &line[..colon],
                    fields: Fields::new(&line[colon + 1..]),
                },
                None => Token::Text(line),
            },
            _ => Token::Text(line),
        }
    }
}

/// Comma separated values of a header line.
///
/// Commas inside double quotes do not split, surrounding quotes and blanks
/// are stripped from each value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields<'a> {
    rest: Option<&'a str>,
}

impl<'a> Fields<'a> {
    pub fn new(list: &'a str) -> Self {
        Fields { rest: Some(list) }
    }

    pub fn get(&self, n: usize) -> Option<&'a str> {
        self.clone().nth(n)
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        let mut quoted = false;
        let mut end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '"' => quoted = !quoted,
                ',' if !quoted => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        self.rest = rest.get(end + 1..);
        Some(unquote(rest[..end].trim()))
    }
}

fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

pub struct Tokens<'a> {
    lines: core::str::Split<'a, char>,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            let line = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(Token::from_line(line));
        }
    }
}

/// Lines of `text`, blank ones skipped.
pub fn tokenize(text: &str) -> Tokens<'_> {
    Tokens {
        lines: text.split('\n'),
    }
}

/// Поля первого заголовка `name` (например `+CREG`)
pub fn header<'a>(text: &'a str, name: &str) -> Option<Fields<'a>> {
    tokenize(text).find_map(|token| match token {
        Token::Header { name: found, fields } if found == name => Some(fields),
        _ => None,
    })
}

/// Final result code present anywhere in `text`
pub fn final_result(text: &str) -> Option<Final> {
    tokenize(text).find_map(|token| match token {
        Token::Final(result) => Some(result),
        _ => None,
    })
}
