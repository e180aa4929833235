// THEORY:
// Color concentration asks how much of each channel's histogram mass sits close to that
// channel's dominant value. A bare shelf is essentially one paint color, so almost all mass
// lands inside the peak window; a stocked shelf spreads mass across many packaging colors.
//
// Hue richness is reported alongside for diagnostics: the share of hue bins (among saturated
// pixels) that hold a meaningful fraction of the busiest bin's mass.

use super::{ExtractError, Method, finite};
use crate::config::ExtractorConfig;
use crate::core_modules::pixel::Pixel;
use crate::core_modules::region::Region;

pub const HUE_BINS: usize = 32;
const MIN_SATURATION: f32 = 0.2;
const HUE_PEAK_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct ColorMeasure {
    /// Mean peak-window concentration over the color channels, before amplification.
    pub concentration: f64,
    pub hue_richness: f64,
    pub score: f64,
}

fn peak_concentration(histogram: &[u64; 256], window: usize, total: u64) -> f64 {
    let (peak, _) = histogram
        .iter()
        .enumerate()
        .max_by_key(|(bin, count)| (**count, std::cmp::Reverse(*bin)))
        .unwrap_or((0, &0));
    let low = peak.saturating_sub(window);
    let high = (peak + window).min(255);
    let mass: u64 = histogram[low..=high].iter().sum();
    mass as f64 / total as f64
}

fn hue_richness(pixels: &[Pixel]) -> f64 {
    let mut bins = [0u64; HUE_BINS];
    for pixel in pixels.iter().filter(|p| p.saturation_hsv() >= MIN_SATURATION) {
        let bin = ((pixel.hue() / 360.0) * HUE_BINS as f32) as usize;
        bins[bin.min(HUE_BINS - 1)] += 1;
    }
    let peak = bins.iter().copied().max().unwrap_or(0);
    if peak == 0 {
        return 0.0;
    }
    let floor = peak as f64 * HUE_PEAK_FRACTION;
    bins.iter().filter(|&&count| count as f64 > floor).count() as f64 / HUE_BINS as f64
}

pub fn measure(region: &Region, config: &ExtractorConfig) -> Result<ColorMeasure, ExtractError> {
    let rgb = region.to_rgb().map_err(|_| ExtractError::UnsupportedChannels {
        method: Method::ColorConcentration,
        channels: region.channels(),
    })?;

    // Gray input replicates one plane, so a single channel is enough.
    let channel_count = if region.channels() == 1 { 1 } else { 3 };
    let mut histograms = vec![[0u64; 256]; channel_count];
    let mut pixels = Vec::with_capacity(region.pixel_count());
    for p in rgb.pixels() {
        for (channel, histogram) in histograms.iter_mut().enumerate() {
            histogram[p[channel] as usize] += 1;
        }
        pixels.push(Pixel::from(*p));
    }

    let total = region.pixel_count() as u64;
    let concentration = histograms
        .iter()
        .map(|h| peak_concentration(h, config.histogram_peak_window, total))
        .sum::<f64>()
        / channel_count as f64;
    let concentration = finite(Method::ColorConcentration, concentration)?;

    Ok(ColorMeasure {
        concentration,
        hue_richness: hue_richness(&pixels),
        score: (concentration * config.color_amplification).min(1.0),
    })
}
