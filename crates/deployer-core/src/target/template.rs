//! Typed target-path templates.
//!
//! A template such as `/srv/www/{slug_project_name}/{slug_build_ref}` is
//! parsed once, when configuration is loaded. Every placeholder is checked
//! against the fixed vocabulary below at parse time, so a typo in the
//! template fails startup instead of the first deployment. Only lookups into
//! the raw event payload can still fail while rendering, because the payload
//! shape is not known in advance.
//!
//! Vocabulary:
//! - `{project.id}`, `{project.name}`, `{project.path}`, `{project.path_with_namespace}`
//! - `{build.id}`, `{build.ref}`, `{build.name}`, `{build.stage}`, `{build.tag}`
//! - `{slug_build_ref}`, `{slug_project_name}`
//! - `{event.key.nested}` or `{event[key][0]}` (alias root: `unsafe_received_data`)
//!
//! `{{` and `}}` produce literal braces.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::ci::{BuildRef, ProjectRef};
use crate::target::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectField {
    Id,
    Name,
    Path,
    PathWithNamespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildField {
    Id,
    Ref,
    Name,
    Stage,
    Tag,
}

/// A resolved placeholder name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Project(ProjectField),
    Build(BuildField),
    SlugBuildRef,
    SlugProjectName,
    /// Key path into the raw event payload.
    Event(Vec<String>),
}

impl Placeholder {
    /// True for values that originate from the webhook sender or CI metadata
    /// rather than from numeric ids.
    pub fn is_free_text(&self) -> bool {
        !matches!(
            self,
            Placeholder::Project(ProjectField::Id)
                | Placeholder::Build(BuildField::Id)
                | Placeholder::Build(BuildField::Tag)
        )
    }
}

impl FromStr for Placeholder {
    type Err = TemplateError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let unknown = || TemplateError::UnknownPlaceholder {
            name: name.to_string(),
        };

        let (root, path) = split_key_path(name).ok_or_else(unknown)?;
        if matches!(root, "event" | "unsafe_received_data") {
            return if path.is_empty() {
                Err(unknown())
            } else {
                Ok(Placeholder::Event(path))
            };
        }

        let field = match path.as_slice() {
            [] => None,
            [field] => Some(field.as_str()),
            _ => None,
        };

        match root {
            "slug_build_ref" if path.is_empty() => Ok(Placeholder::SlugBuildRef),
            "slug_project_name" if path.is_empty() => Ok(Placeholder::SlugProjectName),
            "project" => match field {
                Some("id") => Ok(Placeholder::Project(ProjectField::Id)),
                Some("name") => Ok(Placeholder::Project(ProjectField::Name)),
                Some("path") => Ok(Placeholder::Project(ProjectField::Path)),
                Some("path_with_namespace") => {
                    Ok(Placeholder::Project(ProjectField::PathWithNamespace))
                }
                _ => Err(unknown()),
            },
            "build" => match field {
                Some("id") => Ok(Placeholder::Build(BuildField::Id)),
                Some("ref") => Ok(Placeholder::Build(BuildField::Ref)),
                Some("name") => Ok(Placeholder::Build(BuildField::Name)),
                Some("stage") => Ok(Placeholder::Build(BuildField::Stage)),
                Some("tag") => Ok(Placeholder::Build(BuildField::Tag)),
                _ => Err(unknown()),
            },
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Project(field) => {
                let name = match field {
                    ProjectField::Id => "id",
                    ProjectField::Name => "name",
                    ProjectField::Path => "path",
                    ProjectField::PathWithNamespace => "path_with_namespace",
                };
                write!(f, "project.{name}")
            }
            Placeholder::Build(field) => {
                let name = match field {
                    BuildField::Id => "id",
                    BuildField::Ref => "ref",
                    BuildField::Name => "name",
                    BuildField::Stage => "stage",
                    BuildField::Tag => "tag",
                };
                write!(f, "build.{name}")
            }
            Placeholder::SlugBuildRef => f.write_str("slug_build_ref"),
            Placeholder::SlugProjectName => f.write_str("slug_project_name"),
            Placeholder::Event(path) => write!(f, "event.{}", path.join(".")),
        }
    }
}

/// Split `root.a.b` or `root[a][b]` into `("root", ["a", "b"])`.
fn split_key_path(name: &str) -> Option<(&str, Vec<String>)> {
    let root_end = name.find(['.', '[']).unwrap_or(name.len());
    let root = &name[..root_end];
    if root.is_empty() {
        return None;
    }

    let mut path = Vec::new();
    let mut rest = &name[root_end..];
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            if end == 0 {
                return None;
            }
            path.push(after_dot[..end].to_string());
            rest = &after_dot[end..];
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket.find(']')?;
            if end == 0 {
                return None;
            }
            path.push(after_bracket[..end].to_string());
            rest = &after_bracket[end + 1..];
        } else {
            return None;
        }
    }

    Some((root, path))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Values a template is rendered against.
#[derive(Debug)]
pub struct SubstitutionContext<'a> {
    pub event: &'a Value,
    pub project: &'a ProjectRef,
    pub build: &'a BuildRef,
    pub slug_build_ref: String,
    pub slug_project_name: String,
}

impl<'a> SubstitutionContext<'a> {
    pub fn new(event: &'a Value, project: &'a ProjectRef, build: &'a BuildRef) -> Self {
        Self {
            event,
            project,
            build,
            slug_build_ref: super::slugify(&build.ref_name),
            slug_project_name: super::slugify(&project.name),
        }
    }

    fn lookup(&self, placeholder: &Placeholder) -> Result<String, TemplateError> {
        let value = match placeholder {
            Placeholder::Project(field) => match field {
                ProjectField::Id => self.project.id.to_string(),
                ProjectField::Name => self.project.name.clone(),
                ProjectField::Path => self.project.path.clone(),
                ProjectField::PathWithNamespace => self.project.path_with_namespace.clone(),
            },
            Placeholder::Build(field) => match field {
                BuildField::Id => self.build.id.to_string(),
                BuildField::Ref => self.build.ref_name.clone(),
                BuildField::Name => self.build.name.clone(),
                BuildField::Stage => self.build.stage.clone(),
                BuildField::Tag => self.build.tag.to_string(),
            },
            Placeholder::SlugBuildRef => self.slug_build_ref.clone(),
            Placeholder::SlugProjectName => self.slug_project_name.clone(),
            Placeholder::Event(path) => lookup_event(self.event, path)?,
        };
        Ok(value)
    }
}

fn lookup_event(event: &Value, path: &[String]) -> Result<String, TemplateError> {
    let joined = || path.join(".");

    let mut current = event;
    for key in path {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| TemplateError::MissingEventField { path: joined() })?;
    }

    match current {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            Err(TemplateError::NonScalarEventField { path: joined() })
        }
    }
}

/// A parsed target-path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let syntax = |position: usize, message: &str| TemplateError::Syntax {
            template: source.to_string(),
            position,
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(syntax(pos, "unmatched '}'")),
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (inner_pos, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(syntax(inner_pos, "nested '{' in placeholder")),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(syntax(pos, "unclosed placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.trim().parse()?));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        })
    }

    /// Render against `ctx`. Substituted values that contain a `..` path
    /// component are rejected so an untrusted branch or project name cannot
    /// climb out of the directory the template author intended.
    pub fn render(&self, ctx: &SubstitutionContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(placeholder) => {
                    let value = ctx.lookup(placeholder)?;
                    if placeholder.is_free_text() && has_parent_component(&value) {
                        return Err(TemplateError::PathTraversal {
                            path: format!("{{{placeholder}}} = {value:?}"),
                        });
                    }
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn has_parent_component(value: &str) -> bool {
    value.split(['/', '\\']).any(|part| part == "..")
}
