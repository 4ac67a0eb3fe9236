//! JSON bodies of the HTTP surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::{ResultBatch, Series};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub contents: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFilesRequest {
    /// The first file is the primary input document.
    pub files: Vec<UploadFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFilesResponse {
    pub run_handle: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub vectors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub result_handle: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WireComplex {
    pub re: f64,
    pub im: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum WireValues {
    Real(Vec<f64>),
    Complex(Vec<WireComplex>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireField {
    /// Step name, e.g. `tran0`.
    pub step: String,
    pub name: String,
    #[serde(flatten)]
    pub values: WireValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    pub more: bool,
    pub scale: Option<String>,
    pub data: Vec<WireField>,
}

impl From<ResultBatch> for ReadResponse {
    fn from(batch: ResultBatch) -> Self {
        let data = batch
            .steps
            .into_iter()
            .flat_map(|step| {
                let step_name = step.name;
                step.fields.into_iter().map(move |field| WireField {
                    step: step_name.clone(),
                    name: field.name,
                    values: match field.series {
                        Series::Real(v) => WireValues::Real(v),
                        Series::Complex(v) => WireValues::Complex(
                            v.into_iter()
                                .map(|c| WireComplex { re: c.re, im: c.im })
                                .collect(),
                        ),
                    },
                })
            })
            .collect();
        Self {
            more: batch.more,
            scale: batch.scale,
            data,
        }
    }
}
