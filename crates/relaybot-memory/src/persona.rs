//! Persona files: who the bot is, who it talks to, and its current mood.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{Result, io_err};

const DEFAULT_SOUL: &str = "# Relaybot
- AI assistant for workplace tasks
- Friendly yet professional tone
- Skilled at code-related tasks
";

const DEFAULT_USER: &str = "# User Info
- (Not yet configured)
";

const DEFAULT_MOOD: &str = "# Current State
- Mood: Neutral
- Energy: High
";

/// Contents of the three persona files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persona {
    pub soul: String,
    pub user: String,
    pub mood: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaSection {
    Soul,
    User,
    Mood,
}

impl PersonaSection {
    /// Upper-case name shown to users ("SOUL", "USER", "MOOD").
    pub fn label(&self) -> &'static str {
        match self {
            PersonaSection::Soul => "SOUL",
            PersonaSection::User => "USER",
            PersonaSection::Mood => "MOOD",
        }
    }

    fn file_name(&self) -> &'static str {
        match self {
            PersonaSection::Soul => "SOUL.md",
            PersonaSection::User => "USER.md",
            PersonaSection::Mood => "MOOD.md",
        }
    }

    fn default_content(&self) -> &'static str {
        match self {
            PersonaSection::Soul => DEFAULT_SOUL,
            PersonaSection::User => DEFAULT_USER,
            PersonaSection::Mood => DEFAULT_MOOD,
        }
    }
}

impl FromStr for PersonaSection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soul" => Ok(PersonaSection::Soul),
            "user" => Ok(PersonaSection::User),
            "mood" => Ok(PersonaSection::Mood),
            other => Err(format!("unknown persona section: {other}")),
        }
    }
}

fn read_or_create(dir: &Path, section: PersonaSection) -> Result<String> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(section.file_name());
    if !path.exists() {
        fs::write(&path, section.default_content()).map_err(io_err(&path))?;
        return Ok(section.default_content().to_string());
    }
    fs::read_to_string(&path).map_err(io_err(&path))
}

pub fn load(dir: &Path) -> Result<Persona> {
    Ok(Persona {
        soul: read_or_create(dir, PersonaSection::Soul)?,
        user: read_or_create(dir, PersonaSection::User)?,
        mood: read_or_create(dir, PersonaSection::Mood)?,
    })
}

pub fn update(dir: &Path, section: PersonaSection, content: &str) -> Result<()> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(section.file_name());
    fs::write(&path, content).map_err(io_err(&path))
}
