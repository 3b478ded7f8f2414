use crate::constants::{KEY_ACCESS_ID, KEY_ROOT_URL, KEY_SECRET_KEY};
use snafu::{ensure, Snafu};
use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Credentials file '{}' does not exist", path.display()))]
    Missing { path: PathBuf },

    #[snafu(display("Unable to read credentials file '{}': {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "Credentials file '{}' is incomplete, missing: {}",
        path.display(),
        missing.join(", ")
    ))]
    Incomplete { path: PathBuf, missing: Vec<String> },
}

/// The RapidFort account credentials used by the runtime agent.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_id: String,
    pub secret_key: String,
    pub root_url: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("secret_key", &"<redacted>")
            .field("root_url", &self.root_url)
            .finish()
    }
}

/// Reads the `key=value` credentials file.
pub struct CredentialStore;

impl CredentialStore {
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    pub fn load(path: &Path) -> Result<Credentials> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::Missing { path: path.into() }
            } else {
                Error::Read {
                    path: path.into(),
                    source,
                }
            }
        })?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Credentials> {
        let mut access_id = String::new();
        let mut secret_key = String::new();
        let mut root_url = String::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            let value = unquote(value.trim()).to_string();
            match key.trim() {
                KEY_ACCESS_ID => access_id = value,
                KEY_SECRET_KEY => secret_key = value,
                KEY_ROOT_URL => root_url = value,
                _ => {}
            }
        }

        let missing: Vec<String> = [
            (KEY_ACCESS_ID, &access_id),
            (KEY_SECRET_KEY, &secret_key),
            (KEY_ROOT_URL, &root_url),
        ]
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key.to_string())
        .collect();
        ensure!(missing.is_empty(), IncompleteSnafu { path, missing });

        Ok(Credentials {
            access_id,
            secret_key,
            root_url,
        })
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].trim();
        }
    }
    value
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn parse(contents: &str) -> Result<Credentials> {
        CredentialStore::parse(Path::new("credentials"), contents)
    }

    #[test]
    fn parses_all_fields() {
        let credentials = parse(
            r#"
# RapidFort credentials
access_id = abc123
secret_key="s3cr3t=="
rf_root_url=https://us01.rapidfort.com
other=ignored
"#,
        )
        .unwrap();
        assert_eq!(credentials.access_id, "abc123");
        assert_eq!(credentials.secret_key, "s3cr3t==");
        assert_eq!(credentials.root_url, "https://us01.rapidfort.com");
    }

    #[test]
    fn empty_value_is_incomplete() {
        let err = parse("access_id=abc\nsecret_key=  \nrf_root_url=https://x\n").unwrap_err();
        match err {
            Error::Incomplete { missing, .. } => assert_eq!(missing, vec!["secret_key"]),
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn reports_every_missing_field() {
        let err = parse("access_id=abc\n").unwrap_err();
        match err {
            Error::Incomplete { missing, .. } => {
                assert_eq!(missing, vec!["secret_key", "rf_root_url"])
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(matches!(parse("").unwrap_err(), Error::Incomplete { .. }));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("credentials");
        assert!(!CredentialStore::exists(&path));
        assert!(matches!(
            CredentialStore::load(&path).unwrap_err(),
            Error::Missing { .. }
        ));

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "access_id=a\nsecret_key=b\nrf_root_url=c").unwrap();
        assert!(CredentialStore::exists(&path));
        assert_eq!(CredentialStore::load(&path).unwrap().root_url, "c");
    }

    #[test]
    fn debug_redacts_secret() {
        let credentials = parse("access_id=a\nsecret_key=hunter2\nrf_root_url=c").unwrap();
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }
}
