use crate::ProjectError;
use std::collections::HashMap;
use std::path::Path;

/// One control-point row, already split into tokens.
pub type Row = Vec<String>;

/// Control points grouped by feature name.
///
/// The text format is line based. A line holding a single token opens a section
/// named by that token; every following line is a row of space separated tokens
/// until the next section. Tokens may be double quoted to contain spaces, and a
/// doubled quote inside quotes stands for a literal one.
///
/// ```text
/// Tempo
/// 0 intro 0%
/// 32 intro "+4%" linear
/// 64 outro 0%
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutomationFile {
    sections: HashMap<String, Vec<Row>>,
}

impl AutomationFile {
    pub fn parse(text: &str) -> Self {
        let mut sections: HashMap<String, Vec<Row>> = HashMap::new();
        let mut current: Option<String> = None;

        for line in text.lines() {
            let tokens = tokenize(line);
            match tokens.len() {
                0 => {}
                1 => {
                    let name = tokens.into_iter().next().unwrap_or_default();
                    // a repeated section replaces the earlier one
                    sections.insert(name.clone(), Vec::new());
                    current = Some(name);
                }
                _ => match &current {
                    Some(name) => sections.entry(name.clone()).or_default().push(tokens),
                    None => log::warn!("automation row outside of a section: {line:?}"),
                },
            }
        }

        Self { sections }
    }

    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Rows of a section, empty when the section is absent.
    pub fn section(&self, name: &str) -> &[Row] {
        self.sections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.sections.insert(name.into(), rows);
    }
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '"' {
                    if chars.next_if_eq(&'"').is_some() {
                        token.push('"');
                    } else {
                        break;
                    }
                } else {
                    token.push(c);
                }
            }
        }
        while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
            token.push(c);
        }
        tokens.push(token);
    }

    tokens
}
