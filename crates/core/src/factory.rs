//! Factory descriptors: `"Flat"`, `"HNSW32,Flat"`, `"IVF100,Flat"`, `"IDMap,HNSW,Flat"`.
//!
//! Comma-separated stage tokens. An optional leading `IDMap`/`IDMap2` wraps the result, an
//! optional structure token (`IVF<nlist>` or `HNSW[<m>]`) picks the backend, and the last
//! token must be the per-vector encoding `Flat`. Parsing is driven by a fixed token table.

use crate::config;
use crate::error::{IndexError, Result};
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::idmap::IdMap;
use crate::index::AnyIndex;
use crate::ivf::IvfIndex;
use crate::metric::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    IdMap,
    Ivf,
    Hnsw,
    Flat,
}

#[derive(Debug, Clone, Copy)]
enum Param {
    None,
    Required,
    Optional(usize),
}

/// Longer prefixes come first so `IDMap2` is not read as `IDMap` + `2`.
const TOKENS: &[(&str, Stage, Param)] = &[
    ("IDMap2", Stage::IdMap, Param::None),
    ("IDMap", Stage::IdMap, Param::None),
    ("IVF", Stage::Ivf, Param::Required),
    ("HNSW", Stage::Hnsw, Param::Optional(config::HNSW_DEFAULT_M)),
    ("Flat", Stage::Flat, Param::None),
];

/// Backend selected by a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Flat,
    Hnsw { m: usize },
    Ivf { nlist: usize },
}

/// Parsed factory descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub id_map: bool,
    pub structure: Structure,
}

impl Descriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let invalid = |reason: String| IndexError::InvalidDescriptor {
            descriptor: descriptor.to_string(),
            reason,
        };

        let stages = descriptor
            .split(',')
            .map(|t| parse_token(t.trim()).map_err(&invalid))
            .collect::<Result<Vec<_>>>()?;

        let mut rest = stages.as_slice();
        let id_map = matches!(rest.first(), Some((Stage::IdMap, _)));
        if id_map {
            rest = &rest[1..];
        }

        let structure = match rest.first() {
            Some(&(Stage::Ivf, nlist)) => {
                rest = &rest[1..];
                Structure::Ivf { nlist }
            }
            Some(&(Stage::Hnsw, m)) => {
                if m < 2 {
                    return Err(invalid(format!("HNSW m must be at least 2, got {m}")));
                }
                rest = &rest[1..];
                Structure::Hnsw { m }
            }
            _ => Structure::Flat,
        };

        match rest {
            [(Stage::Flat, _)] => Ok(Self { id_map, structure }),
            [] => Err(invalid("missing encoding stage (expected Flat)".into())),
            [(Stage::Flat, _), ..] => Err(invalid("unexpected tokens after Flat".into())),
            [(Stage::IdMap, _), ..] => Err(invalid("IDMap must be the first stage".into())),
            _ => Err(invalid("structure stage must precede the encoding".into())),
        }
    }

    /// Construct an empty index for this descriptor.
    pub fn build(&self, dimension: usize, metric: MetricType) -> Result<AnyIndex> {
        let index: AnyIndex = match self.structure {
            Structure::Flat => FlatIndex::new(dimension, metric)?.into(),
            Structure::Hnsw { m } => HnswIndex::new(dimension, m, metric)?.into(),
            Structure::Ivf { nlist } => IvfIndex::with_dimension(dimension, nlist, metric)?.into(),
        };
        if self.id_map {
            Ok(IdMap::new(index)?.into())
        } else {
            Ok(index)
        }
    }
}

/// Build an index from a descriptor string.
pub fn index_factory(dimension: usize, descriptor: &str, metric: MetricType) -> Result<AnyIndex> {
    Descriptor::parse(descriptor)?.build(dimension, metric)
}

fn parse_token(token: &str) -> std::result::Result<(Stage, usize), String> {
    if token.is_empty() {
        return Err("empty stage".into());
    }
    let (prefix, stage, param) = TOKENS
        .iter()
        .find(|(prefix, _, _)| token.starts_with(prefix))
        .copied()
        .ok_or_else(|| format!("unrecognized stage '{token}'"))?;
    let suffix = &token[prefix.len()..];

    let value = match (param, suffix.is_empty()) {
        (Param::None, true) => 0,
        (Param::None, false) => return Err(format!("unrecognized stage '{token}'")),
        (Param::Required, true) => return Err(format!("{prefix} requires a size, e.g. {prefix}100")),
        (Param::Optional(default), true) => default,
        (Param::Required | Param::Optional(_), false) => {
            if !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("unrecognized stage '{token}'"));
            }
            let n: usize = suffix
                .parse()
                .map_err(|_| format!("parameter of '{token}' is out of range"))?;
            if n == 0 {
                return Err(format!("parameter of '{token}' must be positive"));
            }
            n
        }
    };
    Ok((stage, value))
}
