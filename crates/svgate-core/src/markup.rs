//! Root `<svg>` inspection and editing.
//!
//! Both helpers stream the markup through `lol_html`, so bytes outside the root start tag are
//! emitted unchanged. Only the first `<svg>` element in document order is considered the root;
//! nested `<svg>` elements (icons, embedded labels) are left alone.

use crate::{Error, Result};
use lol_html::{RewriteStrSettings, element, rewrite_str};

pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
pub const XLINK_NAMESPACE: &str = "http://www.w3.org/1999/xlink";

/// Attributes of the root `<svg>` start tag. Names are ASCII-lowercased by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootAttributes {
    attrs: Vec<(String, String)>,
}

impl RootAttributes {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for RootAttributes {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            attrs: iter.into_iter().collect(),
        }
    }
}

/// Reads the root `<svg>` attributes. Returns `None` when there is no `<svg>` element or the
/// markup cannot be tokenized.
pub fn root_attributes(markup: &str) -> Option<RootAttributes> {
    let mut root: Option<RootAttributes> = None;

    let rewritten = rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("svg", |el| {
                if root.is_none() {
                    root = Some(
                        el.attributes()
                            .iter()
                            .map(|a| (a.name(), a.value()))
                            .collect(),
                    );
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    );

    match rewritten {
        Ok(_) => root,
        Err(err) => {
            tracing::debug!(error = %err, "root attribute scan failed");
            None
        }
    }
}

/// One edit applied to the root `<svg>` start tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootEdit<'a> {
    Set(&'a str, &'a str),
    SetIfMissing(&'a str, &'a str),
    Remove(&'a str),
}

/// Applies `edits` in order to the root `<svg>` start tag and returns the new markup.
pub fn edit_root(markup: &str, edits: &[RootEdit<'_>]) -> Result<String> {
    let mut found = false;

    let out = rewrite_str(
        markup,
        RewriteStrSettings {
            element_content_handlers: vec![element!("svg", |el| {
                if found {
                    return Ok(());
                }
                found = true;
                for edit in edits {
                    match *edit {
                        RootEdit::Set(name, value) => el.set_attribute(name, value)?,
                        RootEdit::SetIfMissing(name, value) => {
                            if !el.has_attribute(name) {
                                el.set_attribute(name, value)?;
                            }
                        }
                        RootEdit::Remove(name) => el.remove_attribute(name),
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|err| Error::Rewrite {
        message: err.to_string(),
    })?;

    if !found {
        return Err(Error::MissingRoot);
    }
    Ok(out)
}
