//! Parser for declarative provider definition files.
//!
//! Operators describe what to pre-load in small HCL-style blocks:
//!
//! ```text
//! provider "hashicorp/random" {
//!   versions  = ["3.5.0", "3.6.0"]
//!   platforms = ["linux_amd64", "darwin_arm64"]
//! }
//! ```
//!
//! Parsing yields one download item per `(version, platform)` pair, in block
//! order. `#` and `//` comments are allowed anywhere outside strings.

use std::collections::HashSet;

use thiserror::Error;

use crate::catalog::ProviderIdentity;

const OSES: &[&str] = &["linux", "darwin", "windows", "freebsd"];
const ARCHES: &[&str] = &["amd64", "arm64", "386", "arm"];

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("definition contains no provider blocks")]
    EmptyDefinition,

    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("invalid provider source '{0}' (expected \"namespace/name\")")]
    InvalidSource(String),

    #[error("invalid version '{version}' for provider '{provider_source}'")]
    InvalidVersion { provider_source: String, version: String },

    #[error("invalid platform '{platform}' for provider '{provider_source}'")]
    InvalidPlatform { provider_source: String, platform: String },

    #[error("provider '{0}' is declared more than once")]
    DuplicateProvider(String),

    #[error("provider '{provider_source}' is missing required attribute '{attribute}'")]
    MissingAttribute {
        provider_source: String,
        attribute: &'static str,
    },

    #[error("provider '{provider_source}' has an empty '{attribute}' list")]
    EmptyAttribute {
        provider_source: String,
        attribute: &'static str,
    },

    #[error("provider '{provider_source}' has unknown attribute '{attribute}'")]
    UnknownAttribute { provider_source: String, attribute: String },
}

pub type Result<T> = std::result::Result<T, DefinitionError>;

/// One parsed `provider` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderBlock {
    pub namespace: String,
    pub name: String,
    pub versions: Vec<String>,
    pub platforms: Vec<String>,
}

impl ProviderBlock {
    pub fn source(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A validated set of provider blocks.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    pub blocks: Vec<ProviderBlock>,
}

impl DefinitionSet {
    /// Parse and validate definition text.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let blocks = parse_blocks(&tokens)?;
        if blocks.is_empty() {
            return Err(DefinitionError::EmptyDefinition);
        }

        let mut seen = HashSet::new();
        for block in &blocks {
            validate_block(block)?;
            if !seen.insert(block.source()) {
                return Err(DefinitionError::DuplicateProvider(block.source()));
            }
        }
        Ok(Self { blocks })
    }

    /// The ordered Cartesian product `versions x platforms` of every block.
    pub fn items(&self) -> Vec<ProviderIdentity> {
        let mut items = Vec::with_capacity(self.item_count());
        for block in &self.blocks {
            for version in &block.versions {
                for platform in &block.platforms {
                    items.push(ProviderIdentity::new(
                        block.namespace.clone(),
                        block.name.clone(),
                        version.clone(),
                        platform.clone(),
                    ));
                }
            }
        }
        items
    }

    pub fn item_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.versions.len() * b.platforms.len())
            .sum()
    }
}

pub fn is_valid_platform(platform: &str) -> bool {
    match platform.split_once('_') {
        Some((os, arch)) => OSES.contains(&os) && ARCHES.contains(&arch),
        None => false,
    }
}

pub fn is_valid_version(version: &str) -> bool {
    semver::Version::parse(version).is_ok()
}

fn is_valid_source_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn validate_block(block: &ProviderBlock) -> Result<()> {
    let source = block.source();
    if !is_valid_source_part(&block.namespace) || !is_valid_source_part(&block.name) {
        return Err(DefinitionError::InvalidSource(source));
    }
    if block.versions.is_empty() {
        return Err(DefinitionError::EmptyAttribute {
            provider_source: source,
            attribute: "versions",
        });
    }
    if block.platforms.is_empty() {
        return Err(DefinitionError::EmptyAttribute {
            provider_source: source,
            attribute: "platforms",
        });
    }
    for version in &block.versions {
        if !is_valid_version(version) {
            return Err(DefinitionError::InvalidVersion {
                provider_source: block.source(),
                version: version.clone(),
            });
        }
    }
    for platform in &block.platforms {
        if !is_valid_platform(platform) {
            return Err(DefinitionError::InvalidPlatform {
                provider_source: block.source(),
                platform: platform.clone(),
            });
        }
    }
    Ok(())
}

// ---- lexer ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eq,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => skip_line(&mut chars),
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    skip_line(&mut chars);
                } else {
                    return Err(DefinitionError::Syntax {
                        line,
                        message: "unexpected '/'".to_string(),
                    });
                }
            }
            '{' => {
                chars.next();
                tokens.push(Spanned { token: Token::LBrace, line });
            }
            '}' => {
                chars.next();
                tokens.push(Spanned { token: Token::RBrace, line });
            }
            '[' => {
                chars.next();
                tokens.push(Spanned { token: Token::LBracket, line });
            }
            ']' => {
                chars.next();
                tokens.push(Spanned { token: Token::RBracket, line });
            }
            '=' => {
                chars.next();
                tokens.push(Spanned { token: Token::Eq, line });
            }
            ',' => {
                chars.next();
                tokens.push(Spanned { token: Token::Comma, line });
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(DefinitionError::Syntax {
                                line,
                                message: "unterminated string".to_string(),
                            });
                        }
                        Some(c) => value.push(c),
                    }
                }
                tokens.push(Spanned { token: Token::Str(value), line });
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Spanned { token: Token::Ident(ident), line });
            }
            other => {
                return Err(DefinitionError::Syntax {
                    line,
                    message: format!("unexpected character '{}'", other),
                });
            }
        }
    }

    Ok(tokens)
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

// ---- parser ----

struct Cursor<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn line(&self) -> usize {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn syntax(&self, message: impl Into<String>) -> DefinitionError {
        DefinitionError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }
}

fn parse_blocks(tokens: &[Spanned]) -> Result<Vec<ProviderBlock>> {
    let mut cursor = Cursor { tokens, pos: 0 };
    let mut blocks = Vec::new();

    while let Some(spanned) = cursor.next() {
        match &spanned.token {
            Token::Ident(word) if word == "provider" => {
                blocks.push(parse_block(&mut cursor)?);
            }
            other => {
                return Err(cursor.syntax(format!(
                    "expected 'provider' block, found {:?}",
                    other
                )));
            }
        }
    }

    Ok(blocks)
}

fn parse_block(cursor: &mut Cursor<'_>) -> Result<ProviderBlock> {
    let source = match cursor.next().map(|s| &s.token) {
        Some(Token::Str(s)) => s.clone(),
        _ => return Err(cursor.syntax("expected provider source string")),
    };
    let (namespace, name) = source
        .split_once('/')
        .ok_or_else(|| DefinitionError::InvalidSource(source.clone()))?;
    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return Err(DefinitionError::InvalidSource(source.clone()));
    }

    match cursor.next().map(|s| &s.token) {
        Some(Token::LBrace) => {}
        _ => return Err(cursor.syntax("expected '{' after provider source")),
    }

    let mut versions: Option<Vec<String>> = None;
    let mut platforms: Option<Vec<String>> = None;

    loop {
        match cursor.next().map(|s| &s.token) {
            Some(Token::RBrace) => break,
            Some(Token::Ident(attr)) => {
                match cursor.next().map(|s| &s.token) {
                    Some(Token::Eq) => {}
                    _ => return Err(cursor.syntax(format!("expected '=' after '{}'", attr))),
                }
                let values = parse_string_list(cursor)?;
                match attr.as_str() {
                    "versions" => versions = Some(values),
                    "platforms" => platforms = Some(values),
                    other => {
                        return Err(DefinitionError::UnknownAttribute {
                            provider_source: source.clone(),
                            attribute: other.to_string(),
                        });
                    }
                }
            }
            _ => return Err(cursor.syntax("expected attribute or '}'")),
        }
    }

    Ok(ProviderBlock {
        namespace: namespace.to_string(),
        name: name.to_string(),
        versions: versions.ok_or(DefinitionError::MissingAttribute {
            provider_source: source.clone(),
            attribute: "versions",
        })?,
        platforms: platforms.ok_or(DefinitionError::MissingAttribute {
            provider_source: source,
            attribute: "platforms",
        })?,
    })
}

fn parse_string_list(cursor: &mut Cursor<'_>) -> Result<Vec<String>> {
    match cursor.next().map(|s| &s.token) {
        Some(Token::LBracket) => {}
        _ => return Err(cursor.syntax("expected '['")),
    }

    let mut values = Vec::new();
    loop {
        match cursor.next().map(|s| &s.token) {
            Some(Token::RBracket) => break,
            Some(Token::Str(value)) => {
                values.push(value.clone());
                match cursor.peek().map(|s| &s.token) {
                    Some(Token::Comma) => {
                        cursor.next();
                    }
                    Some(Token::RBracket) => {}
                    _ => return Err(cursor.syntax("expected ',' or ']' in list")),
                }
            }
            _ => return Err(cursor.syntax("expected string or ']' in list")),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_block() {
        let set = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = ["3.5.0"]
  platforms = ["linux_amd64"]
}
"#,
        )
        .unwrap();
        assert_eq!(set.blocks.len(), 1);
        assert_eq!(set.blocks[0].namespace, "hashicorp");
        assert_eq!(set.blocks[0].name, "random");
        assert_eq!(set.item_count(), 1);
    }

    #[test]
    fn item_count_is_cartesian_product() {
        let set = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = ["3.5.0", "3.6.0", "3.6.1"]
  platforms = ["linux_amd64", "darwin_arm64"]
}

provider "hashicorp/null" {
  versions  = ["3.2.0"]
  platforms = ["linux_amd64", "darwin_arm64", "windows_amd64"]
}
"#,
        )
        .unwrap();
        assert_eq!(set.item_count(), 3 * 2 + 1 * 3);
        let items = set.items();
        assert_eq!(items.len(), set.item_count());
        // Block order, then versions, then platforms.
        assert_eq!(items[0].key(), "hashicorp/random/3.5.0/linux_amd64");
        assert_eq!(items[1].key(), "hashicorp/random/3.5.0/darwin_arm64");
        assert_eq!(items[6].key(), "hashicorp/null/3.2.0/linux_amd64");
    }

    #[test]
    fn accepts_comments_and_prerelease_versions() {
        let set = DefinitionSet::parse(
            r#"
# pinned for the migration
provider "hashicorp/aws" {
  versions  = ["5.0.0-beta1", "5.0.0+build.7"]  // both spellings occur upstream
  platforms = ["linux_amd64"]
}
"#,
        )
        .unwrap();
        assert_eq!(set.item_count(), 2);
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(
            DefinitionSet::parse("  \n# nothing here\n"),
            Err(DefinitionError::EmptyDefinition)
        ));
    }

    #[test]
    fn duplicate_provider_fails() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = ["3.5.0"]
  platforms = ["linux_amd64"]
}
provider "hashicorp/random" {
  versions  = ["3.6.0"]
  platforms = ["linux_amd64"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateProvider(_)));
    }

    #[test]
    fn invalid_source_fails() {
        for source in ["hashicorp", "bad source/name", "ns/na/me", "ns/"] {
            let input = format!(
                "provider \"{}\" {{\n versions = [\"1.0.0\"]\n platforms = [\"linux_amd64\"]\n}}",
                source
            );
            assert!(
                matches!(
                    DefinitionSet::parse(&input),
                    Err(DefinitionError::InvalidSource(_))
                ),
                "source {:?}",
                source
            );
        }
    }

    #[test]
    fn invalid_version_fails() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = ["3.5"]
  platforms = ["linux_amd64"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidVersion { .. }));
    }

    #[test]
    fn invalid_platform_fails() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = ["3.5.0"]
  platforms = ["solaris_sparc"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidPlatform { .. }));
    }

    #[test]
    fn empty_lists_fail() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions  = []
  platforms = ["linux_amd64"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::EmptyAttribute { .. }));
    }

    #[test]
    fn missing_attribute_fails() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions = ["3.5.0"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::MissingAttribute {
                attribute: "platforms",
                ..
            }
        ));
    }

    #[test]
    fn unknown_attribute_fails() {
        let err = DefinitionSet::parse(
            r#"
provider "hashicorp/random" {
  versions = ["3.5.0"]
  platforms = ["linux_amd64"]
  mirror = ["yes"]
}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownAttribute { .. }));
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        let err = DefinitionSet::parse("provider \"hashicorp/random\n").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax { .. }));
    }

    #[test]
    fn platform_validation() {
        assert!(is_valid_platform("linux_amd64"));
        assert!(is_valid_platform("freebsd_386"));
        assert!(!is_valid_platform("linux"));
        assert!(!is_valid_platform("linux_mips"));
        assert!(!is_valid_platform("plan9_amd64"));
    }
}
