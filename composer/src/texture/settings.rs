use std::str::FromStr;

use structopt::StructOpt;

use base::defs::{Error, ErrorKind::*, Result};

// How the smoothness weight of an adjacency edge is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeWeighting {
    Uniform,
    EdgeLength,
}

impl FromStr for EdgeWeighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uniform" => Ok(EdgeWeighting::Uniform),
            "edge-length" => Ok(EdgeWeighting::EdgeLength),
            _ => Err(Error::new(
                MalformedData,
                "unknown edge weighting (can be 'uniform' or 'edge-length')"
                    .to_string(),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorClamp {
    pub min: f32,
    pub max: f32,
}

impl ColorClamp {
    pub fn apply(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

#[derive(Clone, Copy, Debug, StructOpt)]
pub struct TexturingParams {
    #[structopt(
        help = "Smoothness term weight of view selection",
        long,
        default_value = "1.0"
    )]
    pub smoothness: f64,

    #[structopt(
        help = "Edge weight policy (uniform or edge-length)",
        long,
        default_value = "edge-length"
    )]
    pub edge_weighting: EdgeWeighting,

    #[structopt(
        help = "Maximal number of label passes of view selection",
        long,
        default_value = "100"
    )]
    pub max_selection_passes: usize,

    #[structopt(help = "Skip global seam leveling", long)]
    pub skip_global_seam_leveling: bool,

    #[structopt(help = "Skip local seam leveling", long)]
    pub skip_local_seam_leveling: bool,

    #[structopt(
        help = "Weight of the correction magnitude in global leveling",
        long,
        default_value = "1e-3"
    )]
    pub leveling_regularization: f64,

    #[structopt(
        help = "Maximal number of conjugate gradient iterations",
        long,
        default_value = "2000"
    )]
    pub solver_max_iterations: usize,

    #[structopt(
        help = "Relative residual at which the solver stops",
        long,
        default_value = "1e-8"
    )]
    pub solver_tolerance: f64,

    #[structopt(
        help = "Radius of local seam blending in pixels",
        long,
        default_value = "8"
    )]
    pub blend_radius: f64,

    #[structopt(
        help = "Extra pixels around every texture patch",
        long,
        default_value = "1"
    )]
    pub patch_border: u32,

    #[structopt(
        help = "Lower bound of corrected colors",
        long,
        default_value = "0.0"
    )]
    pub color_min: f32,

    #[structopt(
        help = "Upper bound of corrected colors",
        long,
        default_value = "1.0"
    )]
    pub color_max: f32,
}

impl TexturingParams {
    pub fn color_clamp(&self) -> ColorClamp {
        ColorClamp {
            min: self.color_min,
            max: self.color_max,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |desc: &str| Err(Error::new(ValidationError, desc.into()));
        if !(self.smoothness >= 0.0 && self.smoothness.is_finite()) {
            return fail("smoothness must be a non-negative number");
        }
        if !(self.leveling_regularization > 0.0) {
            return fail("leveling regularization must be positive");
        }
        if !(self.solver_tolerance > 0.0) {
            return fail("solver tolerance must be positive");
        }
        if !(self.blend_radius >= 0.0) {
            return fail("blend radius must be non-negative");
        }
        if !(self.color_min <= self.color_max) {
            return fail("color clamp must satisfy min <= max");
        }
        Ok(())
    }
}

impl Default for TexturingParams {
    fn default() -> Self {
        Self {
            smoothness: 1.0,
            edge_weighting: EdgeWeighting::EdgeLength,
            max_selection_passes: 100,
            skip_global_seam_leveling: false,
            skip_local_seam_leveling: false,
            leveling_regularization: 1e-3,
            solver_max_iterations: 2000,
            solver_tolerance: 1e-8,
            blend_radius: 8.0,
            patch_border: 1,
            color_min: 0.0,
            color_max: 1.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_edge_weighting_from_str() {
        assert_eq!(
            "uniform".parse::<EdgeWeighting>().unwrap(),
            EdgeWeighting::Uniform
        );
        assert_eq!(
            "edge-length".parse::<EdgeWeighting>().unwrap(),
            EdgeWeighting::EdgeLength
        );
        let err = "cotan".parse::<EdgeWeighting>().unwrap_err();
        assert_eq!(err.kind, MalformedData);
    }

    #[test]
    fn test_defaults_match_command_line() {
        let parsed = TexturingParams::from_iter(&["texrecon"]);
        let default = TexturingParams::default();
        assert_eq!(parsed.smoothness, default.smoothness);
        assert_eq!(parsed.edge_weighting, default.edge_weighting);
        assert_eq!(parsed.max_selection_passes, default.max_selection_passes);
        assert_eq!(
            parsed.leveling_regularization,
            default.leveling_regularization
        );
        assert_eq!(parsed.solver_tolerance, default.solver_tolerance);
        assert_eq!(parsed.blend_radius, default.blend_radius);
        assert_eq!(parsed.patch_border, default.patch_border);
        assert_eq!(parsed.color_clamp(), default.color_clamp());
        assert!(default.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let params = TexturingParams {
            smoothness: -1.0,
            ..Default::default()
        };
        assert_eq!(params.validate().unwrap_err().kind, ValidationError);
        let params = TexturingParams {
            color_min: 1.0,
            color_max: 0.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_color_clamp() {
        let clamp = ColorClamp { min: 0.0, max: 1.0 };
        assert_eq!(clamp.apply(1.5), 1.0);
        assert_eq!(clamp.apply(-0.5), 0.0);
        assert_eq!(clamp.apply(0.25), 0.25);
    }
}
