//! Static light extraction from the world's entity description text.
//!
//! The text is a sequence of brace-delimited blocks of quoted key/value
//! pairs, with `//` line comments:
//!
//! ```text
//! {
//! "classname" "light"
//! "origin" "128 64 32"
//! "light" "400"
//! "_color" "255 200 150"
//! }
//! ```

use std::collections::HashSet;

use crate::light::Light;
use crate::util::{Error, Result, Vec3};
use crate::world::World;

/// Intensity used when a light entity has no `light` key.
const DEFAULT_INTENSITY: f32 = 300.0;
/// Spot cone half-angle used when a targeted light has no `angle` key.
const DEFAULT_SPOT_ANGLE: f32 = 20.0;

/// One entity block, keys in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    pub pairs: Vec<(String, String)>,
}

impl Entity {
    /// Last value for a key (later duplicates win).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn classname(&self) -> &str {
        self.get("classname").unwrap_or_default()
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Str(&'a str),
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn skip_trivia(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < bytes.len() && bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>> {
        self.skip_trivia();
        let bytes = self.src.as_bytes();
        let Some(&b) = bytes.get(self.pos) else {
            return Ok(None);
        };
        match b {
            b'{' => {
                self.pos += 1;
                Ok(Some(Token::Open))
            }
            b'}' => {
                self.pos += 1;
                Ok(Some(Token::Close))
            }
            b'"' => {
                let start = self.pos + 1;
                let Some(len) = self.src[start..].find(['"', '\n']) else {
                    return Err(Error::entity(self.line, "unterminated string"));
                };
                if bytes[start + len] == b'\n' {
                    return Err(Error::entity(self.line, "newline inside string"));
                }
                self.pos = start + len + 1;
                Ok(Some(Token::Str(&self.src[start..start + len])))
            }
            _ => {
                // Bare word, accepted for robustness
                let start = self.pos;
                while self.pos < bytes.len()
                    && !bytes[self.pos].is_ascii_whitespace()
                    && !matches!(bytes[self.pos], b'{' | b'}' | b'"')
                {
                    self.pos += 1;
                }
                Ok(Some(Token::Str(&self.src[start..self.pos])))
            }
        }
    }

    /// Move to the next `{` that opens a line, the start of the next block.
    fn skip_to_next_block(&mut self) {
        let bytes = self.src.as_bytes();
        let mut line_start = false;
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'{' if line_start => return,
                b'\n' => {
                    self.line += 1;
                    line_start = true;
                }
                b if b.is_ascii_whitespace() => {}
                _ => line_start = false,
            }
            self.pos += 1;
        }
    }
}

/// Tokenize an entity blob into blocks, failing on the first malformed one.
pub fn parse_entities(text: &str) -> Result<Vec<Entity>> {
    let (entities, mut errors) = parse_entities_lossy(text);
    match errors.is_empty() {
        true => Ok(entities),
        false => Err(errors.swap_remove(0)),
    }
}

/// Tokenize an entity blob, skipping malformed blocks.
///
/// After an error parsing resumes at the next `{` that starts a line; the
/// blocks that parsed are kept and every error is returned in order.
pub fn parse_entities_lossy(text: &str) -> (Vec<Entity>, Vec<Error>) {
    let mut tok = Tokenizer::new(text);
    let mut entities = Vec::new();
    let mut errors = Vec::new();

    loop {
        let block = match tok.next_token() {
            Ok(None) => break,
            Ok(Some(Token::Open)) => parse_block(&mut tok),
            Ok(Some(_)) => Err(Error::entity(tok.line, "expected '{'")),
            Err(err) => Err(err),
        };
        match block {
            Ok(entity) => entities.push(entity),
            Err(err) => {
                errors.push(err);
                tok.skip_to_next_block();
            }
        }
    }
    (entities, errors)
}

/// Key/value pairs up to the closing brace; the `{` is already consumed.
fn parse_block(tok: &mut Tokenizer<'_>) -> Result<Entity> {
    let mut entity = Entity::default();
    loop {
        match tok.next_token()? {
            Some(Token::Close) => return Ok(entity),
            Some(Token::Str(key)) => match tok.next_token()? {
                Some(Token::Str(value)) => entity.pairs.push((key.to_owned(), value.to_owned())),
                _ => return Err(Error::entity(tok.line, format!("key '{key}' without value"))),
            },
            Some(Token::Open) => return Err(Error::entity(tok.line, "nested '{'")),
            None => return Err(Error::entity(tok.line, "missing '}'")),
        }
    }
}

fn parse_vec3(key: &str, value: &str) -> Result<Vec3> {
    let parts: Vec<f32> = value
        .split_whitespace()
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::InvalidEntityValue {
            key: key.into(),
            value: value.into(),
        })?;
    match parts.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(Error::InvalidEntityValue {
            key: key.into(),
            value: value.into(),
        }),
    }
}

fn parse_f32(key: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::InvalidEntityValue {
            key: key.into(),
            value: value.into(),
        })
}

/// Colors written as 0-255 are rescaled to 0-1.
fn normalize_color(c: Vec3) -> Vec3 {
    let c = c.max(Vec3::ZERO);
    if c.max_element() > 1.0 {
        c / 255.0
    } else {
        c
    }
}

/// Extract static lights from the world's entity text.
///
/// Malformed blocks and entities are skipped; each distinct cause is logged
/// once per call. Lights in well-formed blocks survive a broken neighbour.
#[tracing::instrument(skip_all, fields(world = %world.name))]
pub fn extract_static_lights(world: &World) -> Vec<Light> {
    let mut reported: HashSet<String> = HashSet::new();
    let mut report = |err: Error| {
        let cause = match &err {
            Error::InvalidEntityValue { key, .. } => format!("value:{key}"),
            Error::EntityParse { message, .. } => format!("parse:{message}"),
            other => other.to_string(),
        };
        if reported.insert(cause) {
            tracing::warn!("light entity skipped: {err}");
        }
    };

    let (entities, errors) = parse_entities_lossy(&world.entities);
    errors.into_iter().for_each(&mut report);

    let mut lights = Vec::new();
    for entity in &entities {
        if !entity.classname().to_ascii_lowercase().contains("light") {
            continue;
        }
        match light_from_entity(entity, &entities, world) {
            Ok(light) => lights.push(light),
            Err(err) => report(err),
        }
    }

    tracing::debug!(count = lights.len(), entities = entities.len(), "static lights extracted");
    lights
}

fn light_from_entity(entity: &Entity, all: &[Entity], world: &World) -> Result<Light> {
    let origin = match entity.get("origin") {
        Some(v) => parse_vec3("origin", v)?,
        None => return Err(Error::other("light entity without origin")),
    };
    let intensity = entity
        .get("light")
        .map(|v| parse_f32("light", v))
        .transpose()?
        .unwrap_or(DEFAULT_INTENSITY);
    let color = entity
        .get("_color")
        .map(|v| parse_vec3("_color", v))
        .transpose()?
        .map_or(Vec3::ONE, normalize_color);
    let radius = entity
        .get("radius")
        .map(|v| parse_f32("radius", v))
        .transpose()?
        .unwrap_or(intensity);

    let target = entity.get("target").and_then(|name| {
        all.iter()
            .find(|e| e.get("targetname") == Some(name))
            .and_then(|e| e.get("origin"))
            .and_then(|v| parse_vec3("origin", v).ok())
    });

    let light = match target {
        Some(target) if target.distance_squared(origin) > 1e-6 => {
            let angle = entity
                .get("angle")
                .map(|v| parse_f32("angle", v))
                .transpose()?
                .unwrap_or(DEFAULT_SPOT_ANGLE);
            Light::spot(origin, target - origin, angle.clamp(1.0, 89.0), color, intensity, radius)
        }
        _ => Light::point(origin, color, intensity, radius),
    };

    let mut light = light
        .with_static(true)
        .with_area(world.point_cluster(origin));
    light.clamp_radius();
    Ok(light)
}
