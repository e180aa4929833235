use anyhow::{Context, bail};
use clap::Parser;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::info;
use shelf_vision::{
    AnalysisResult, LogAlertSink, MonitorConfig, Region, Section, SectionGeometry, ShelfMonitor,
    VisualState,
};
use std::path::{Path, PathBuf};

/// Runs the empty-shelf engine over still frames and prints one JSON result per section.
#[derive(Debug, Parser)]
#[command(name = "shelf_tester", version)]
struct Args {
    /// TOML monitor configuration.
    #[arg(short, long, env = "SHELF_CONFIG")]
    config: Option<PathBuf>,

    /// Extra section as NAME=X,Y,WIDTH,HEIGHT. Repeatable.
    #[arg(short, long = "section", value_parser = parse_section)]
    sections: Vec<Section>,

    /// Overrides the configured sensitivity (0.1-1.0).
    #[arg(long)]
    sensitivity: Option<f64>,

    /// Seconds between consecutive frames, used as the analysis clock.
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Writes a copy of each frame with section outlines colored by state.
    #[arg(long)]
    annotate_dir: Option<PathBuf>,

    /// Frames to analyse, in order.
    #[arg(required = true)]
    frames: Vec<PathBuf>,
}

fn parse_section(text: &str) -> Result<Section, String> {
    let (name, rest) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=X,Y,WIDTH,HEIGHT, got {text:?}"))?;
    let numbers = rest
        .split(',')
        .map(|n| n.trim().parse::<u32>().map_err(|e| format!("{n:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match numbers.as_slice() {
        [x, y, width, height] => Ok(Section::rect(name.trim(), *x, *y, *width, *height)),
        _ => Err(format!("expected four numbers after '=', got {}", numbers.len())),
    }
}

fn state_color(result: &AnalysisResult) -> Rgb<u8> {
    match result.visual_state {
        VisualState::WellStocked => Rgb([0, 200, 0]),
        VisualState::CriticallyEmpty => Rgb([255, 0, 0]),
        VisualState::MostlyEmpty => Rgb([255, 69, 0]),
        VisualState::PartiallyEmpty => Rgb([255, 165, 0]),
        VisualState::LowStock => Rgb([255, 255, 0]),
        VisualState::Uncertain => Rgb([128, 128, 128]),
    }
}

fn annotate(
    frame: &image::DynamicImage,
    sections: &[Section],
    results: &[AnalysisResult],
    out: &Path,
) -> anyhow::Result<()> {
    let mut canvas: RgbImage = frame.to_rgb8();
    for result in results {
        let Some(section) = sections.iter().find(|s| s.name == result.section) else {
            continue;
        };
        let (x, y, w, h) = match &section.geometry {
            SectionGeometry::Rect { x, y, width, height } => (*x as i32, *y as i32, *width, *height),
            SectionGeometry::Quad { corners } => {
                let min_x = corners.iter().map(|c| c.x).fold(f32::MAX, f32::min);
                let min_y = corners.iter().map(|c| c.y).fold(f32::MAX, f32::min);
                let max_x = corners.iter().map(|c| c.x).fold(f32::MIN, f32::max);
                let max_y = corners.iter().map(|c| c.y).fold(f32::MIN, f32::max);
                (
                    min_x as i32,
                    min_y as i32,
                    (max_x - min_x).max(1.0) as u32,
                    (max_y - min_y).max(1.0) as u32,
                )
            }
        };
        let thickness = if result.is_empty { 3 } else { 1 };
        for inset in 0..thickness {
            if w <= 2 * inset || h <= 2 * inset {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, state_color(result));
        }
    }
    canvas
        .save(out)
        .with_context(|| format!("writing {}", out.display()))
}

fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(sensitivity) = args.sensitivity {
        config.sensitivity = sensitivity;
    }
    if let Some(dir) = &args.annotate_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    // --- 2. Engine Initialization ---
    let mut monitor = ShelfMonitor::new(config).with_alert_sink(Box::new(LogAlertSink));
    for section in args.sections {
        monitor.register_section(section);
    }

    // --- 3. Main Processing Loop ---
    for (index, path) in args.frames.iter().enumerate() {
        let frame = image::open(path).with_context(|| format!("opening {}", path.display()))?;
        let region = Region::from_dynamic(&frame)
            .with_context(|| format!("converting {}", path.display()))?;
        if monitor.sections().is_empty() {
            monitor.register_section(Section::rect("Frame", 0, 0, region.width(), region.height()));
        }

        let timestamp = index as f64 * args.interval;
        let results = monitor.analyze_frame(&region, Some(timestamp));
        if results.is_empty() {
            bail!("no sections to analyse");
        }

        // --- 4. Report ---
        for result in &results {
            println!("{}", serde_json::to_string(result)?);
        }

        // --- 5. Visualization ---
        if let Some(dir) = &args.annotate_dir {
            let name = path.file_name().map(PathBuf::from).unwrap_or_else(|| format!("frame_{index}.png").into());
            annotate(&frame, monitor.sections(), &results, &dir.join(name))?;
        }
    }

    for section in monitor.sections() {
        if let Some(stats) = monitor.statistics(&section.name) {
            info!("{}: {}", section.name, serde_json::to_string(&stats)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_section_argument() {
        let section = parse_section("Dairy=10,20,100,50").unwrap();
        assert_eq!(section.name, "Dairy");
        assert_eq!(
            section.geometry,
            SectionGeometry::Rect { x: 10, y: 20, width: 100, height: 50 }
        );
        assert!(parse_section("Dairy=10,20").is_err());
        assert!(parse_section("Dairy").is_err());
    }

    #[test]
    fn cli_requires_frames() {
        assert!(Args::try_parse_from(["shelf_tester"]).is_err());
        let args = Args::try_parse_from(["shelf_tester", "-s", "A=0,0,40,40", "a.png"]).unwrap();
        assert_eq!(args.sections.len(), 1);
        assert_eq!(args.interval, 1.0);
    }
}
