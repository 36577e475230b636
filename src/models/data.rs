use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::FailureKind;

/// Decoded screenshot, three 8-bit channels.
pub type RawImage = RgbImage;

/// Which preprocessing path produced an image fed to the OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Watermark-aware HSV masking, local contrast, sharpening, Otsu threshold.
    Primary,
    /// RGB-band masking followed by an adaptive threshold.
    Alternative,
    /// Cropped grayscale frame with no further processing.
    Unprocessed,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            Variant::Primary => "primary",
            Variant::Alternative => "alternative",
            Variant::Unprocessed => "unprocessed",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    pub variant: Variant,
}

impl NormalizedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn count_black(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == 0).count()
    }

    pub fn count_white(&self) -> usize {
        self.image.pixels().filter(|p| p[0] == 255).count()
    }
}

/// Text fragments recognized on one image variant, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub fragments: Vec<String>,
    pub text: String,
    pub variant: Variant,
}

impl RecognitionResult {
    pub fn new(fragments: Vec<String>, variant: Variant) -> Self {
        let text = fragments.join("\n");
        Self {
            fragments,
            text,
            variant,
        }
    }

    pub fn empty(variant: Variant) -> Self {
        Self::new(Vec::new(), variant)
    }

    /// Quality signal used to rank attempts.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// The fixed registry schema, in output column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Placa,
    NSerie,
    NVin,
    NMotor,
    Color,
    Marca,
    Modelo,
    PlacaVigente,
    PlacaAnterior,
    Estado,
    Anotaciones,
    Sede,
    AnioModelo,
    Propietarios,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Placa,
        Field::NSerie,
        Field::NVin,
        Field::NMotor,
        Field::Color,
        Field::Marca,
        Field::Modelo,
        Field::PlacaVigente,
        Field::PlacaAnterior,
        Field::Estado,
        Field::Anotaciones,
        Field::Sede,
        Field::AnioModelo,
        Field::Propietarios,
    ];

    /// Column name used in every export.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Placa => "placa",
            Field::NSerie => "n_serie",
            Field::NVin => "n_vin",
            Field::NMotor => "n_motor",
            Field::Color => "color",
            Field::Marca => "marca",
            Field::Modelo => "modelo",
            Field::PlacaVigente => "placa_vigente",
            Field::PlacaAnterior => "placa_anterior",
            Field::Estado => "estado",
            Field::Anotaciones => "anotaciones",
            Field::Sede => "sede",
            Field::AnioModelo => "año_modelo",
            Field::Propietarios => "propietarios",
        }
    }
}

/// One parsed registry result. Empty strings mean "not found".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub placa: String,
    pub n_serie: String,
    pub n_vin: String,
    pub n_motor: String,
    pub color: String,
    pub marca: String,
    pub modelo: String,
    pub placa_vigente: String,
    pub placa_anterior: String,
    pub estado: String,
    pub anotaciones: String,
    pub sede: String,
    #[serde(rename = "año_modelo")]
    pub anio_modelo: String,
    pub propietarios: String,
    pub raw_text: String,
}

impl VehicleRecord {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Placa => &self.placa,
            Field::NSerie => &self.n_serie,
            Field::NVin => &self.n_vin,
            Field::NMotor => &self.n_motor,
            Field::Color => &self.color,
            Field::Marca => &self.marca,
            Field::Modelo => &self.modelo,
            Field::PlacaVigente => &self.placa_vigente,
            Field::PlacaAnterior => &self.placa_anterior,
            Field::Estado => &self.estado,
            Field::Anotaciones => &self.anotaciones,
            Field::Sede => &self.sede,
            Field::AnioModelo => &self.anio_modelo,
            Field::Propietarios => &self.propietarios,
        }
    }

    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Placa => &mut self.placa,
            Field::NSerie => &mut self.n_serie,
            Field::NVin => &mut self.n_vin,
            Field::NMotor => &mut self.n_motor,
            Field::Color => &mut self.color,
            Field::Marca => &mut self.marca,
            Field::Modelo => &mut self.modelo,
            Field::PlacaVigente => &mut self.placa_vigente,
            Field::PlacaAnterior => &mut self.placa_anterior,
            Field::Estado => &mut self.estado,
            Field::Anotaciones => &mut self.anotaciones,
            Field::Sede => &mut self.sede,
            Field::AnioModelo => &mut self.anio_modelo,
            Field::Propietarios => &mut self.propietarios,
        }
    }

    /// First write wins: returns false when the field already holds a value.
    pub fn set_if_empty(&mut self, field: Field, value: &str) -> bool {
        let value = value.trim();
        let slot = self.slot(field);
        if !slot.is_empty() || value.is_empty() {
            return false;
        }
        *slot = value.to_string();
        true
    }

    pub fn set(&mut self, field: Field, value: String) {
        *self.slot(field) = value;
    }

    pub fn is_empty(&self, field: Field) -> bool {
        self.get(field).is_empty()
    }

    pub fn populated_fields(&self) -> usize {
        Field::ALL.iter().filter(|f| !self.is_empty(**f)).count()
    }
}

/// A single image that could not be turned into a clean record.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub file: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub records: Vec<VehicleRecord>,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<BatchFailure>,
    pub eligible: usize,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.successful + self.failed
    }
}
