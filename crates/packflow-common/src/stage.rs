use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A position in the production pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    Design,
    Printing,
    Lamination,
    DieCut,
    Assembly,
    Packing,
    Dispatch,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Design,
        Stage::Printing,
        Stage::Lamination,
        Stage::DieCut,
        Stage::Assembly,
        Stage::Packing,
        Stage::Dispatch,
        Stage::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "Design",
            Self::Printing => "Printing",
            Self::Lamination => "Lamination",
            Self::DieCut => "DieCut",
            Self::Assembly => "Assembly",
            Self::Packing => "Packing",
            Self::Dispatch => "Dispatch",
            Self::Completed => "Completed",
        }
    }

    /// Field-name prefix for the stage's per-order fields (`diecut_start`,
    /// `packing_completed_at`, ...). `Completed` has no work fields.
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Self::Design => Some("design"),
            Self::Printing => Some("printing"),
            Self::Lamination => Some("lamination"),
            Self::DieCut => Some("diecut"),
            Self::Assembly => Some("assembly"),
            Self::Packing => Some("packing"),
            Self::Dispatch => Some("dispatch"),
            Self::Completed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Department stages, i.e. every stage except `Completed`.
    pub fn departments() -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(|s| !s.is_terminal())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "design" => Ok(Self::Design),
            "printing" => Ok(Self::Printing),
            "lamination" => Ok(Self::Lamination),
            "diecut" => Ok(Self::DieCut),
            "assembly" => Ok(Self::Assembly),
            "packing" | "packaging" => Ok(Self::Packing),
            "dispatch" => Ok(Self::Dispatch),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

impl TryFrom<String> for Stage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.as_str().to_string()
    }
}

const BAG_PIPELINE: &[Stage] = &[
    Stage::Design,
    Stage::Printing,
    Stage::Lamination,
    Stage::Assembly,
    Stage::Packing,
    Stage::Dispatch,
    Stage::Completed,
];

const BOX_PIPELINE: &[Stage] = &[
    Stage::Design,
    Stage::Printing,
    Stage::Lamination,
    Stage::DieCut,
    Stage::Assembly,
    Stage::Packing,
    Stage::Dispatch,
    Stage::Completed,
];

/// What is being manufactured. Decides which stages an order visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProductType {
    Bag,
    Box,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bag => "Bag",
            Self::Box => "Box",
        }
    }

    pub fn pipeline(&self) -> &'static [Stage] {
        match self {
            Self::Bag => BAG_PIPELINE,
            Self::Box => BOX_PIPELINE,
        }
    }

    pub fn visits(&self, stage: Stage) -> bool {
        self.pipeline().contains(&stage)
    }

    /// The stage after `current`, or `None` at the end of the pipeline or
    /// when `current` is not part of it.
    pub fn next_stage(&self, current: Stage) -> Option<Stage> {
        let pipeline = self.pipeline();
        let idx = pipeline.iter().position(|s| *s == current)?;
        pipeline.get(idx + 1).copied()
    }

    /// The stage before `current` on this pipeline.
    pub fn previous_stage(&self, current: Stage) -> Option<Stage> {
        let pipeline = self.pipeline();
        let idx = pipeline.iter().position(|s| *s == current)?;
        idx.checked_sub(1).map(|i| pipeline[i])
    }

    pub fn position(&self, stage: Stage) -> Option<usize> {
        self.pipeline().iter().position(|s| *s == stage)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bag" => Ok(Self::Bag),
            "box" => Ok(Self::Box),
            _ => Err(format!("Invalid product type: {}", s)),
        }
    }
}

impl TryFrom<String> for ProductType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProductType> for String {
    fn from(product: ProductType) -> Self {
        product.as_str().to_string()
    }
}
