//! Synthetic Sequence Generator
//!
//! Writes a small synthetic dataset in the layout the pipeline expects:
//! frame PNGs, `.flo` flow files between consecutive frames, and a
//! manifest of target frames. Useful for exercising the pipeline
//! end-to-end without the real dataset.

use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use image::{Rgb, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const FLO_MAGIC: f32 = 202021.25;
const SEQUENCE: &str = "synthetic_000000";
const CITY: &str = "synthetic";
const SPLIT: &str = "val";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gen_synthetic=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let root = args.get(1).map(|s| s.as_str()).unwrap_or("data");
    let frames: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(8);
    let width: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(2048);
    let height: u32 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(1024);
    let prev_frames: u32 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(2);

    info!(root, frames, width, height, "Generating synthetic sequence");

    let image_dir = Path::new(root)
        .join("leftImg8bit_sequence")
        .join(SPLIT)
        .join(CITY);
    let flow_dir = Path::new(root)
        .join("flow_sequence")
        .join(SPLIT)
        .join(CITY);
    fs::create_dir_all(&image_dir)?;
    fs::create_dir_all(&flow_dir)?;

    for i in 0..frames {
        let name = format!("{SEQUENCE}_{i:06}_leftImg8bit");

        // A gradient that drifts one pixel per frame, so consecutive
        // frames differ and the constant flow below is consistent.
        let mut img = RgbImage::new(width, height);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let shifted = (x + i) % width;
            let r = (shifted * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = ((x + y) % 256) as u8;
            *p = Rgb([r, g, b]);
        }
        let img_path = image_dir.join(format!("{name}.png"));
        img.save(&img_path)
            .with_context(|| format!("writing {}", img_path.display()))?;

        if i > 0 {
            let flo_path = flow_dir.join(format!("{name}.flo"));
            write_flo(&flo_path, width, height, -1.0, 0.0)
                .with_context(|| format!("writing {}", flo_path.display()))?;
        }

        if (i + 1) % 4 == 0 {
            info!("Generated {}/{} frames", i + 1, frames);
        }
    }

    // Target every frame that has a full temporal context.
    let manifest_path = Path::new(root).join(format!("{SPLIT}_frames.txt"));
    let mut manifest = BufWriter::new(File::create(&manifest_path)?);
    writeln!(manifest, "# synthetic targets")?;
    for i in prev_frames..frames {
        writeln!(manifest, "{SEQUENCE}_{i:06}")?;
    }
    manifest.flush()?;

    info!(
        manifest = %manifest_path.display(),
        targets = frames.saturating_sub(prev_frames),
        "Synthetic dataset complete"
    );
    Ok(())
}

/// Write a constant `.flo` flow field.
fn write_flo(path: &Path, width: u32, height: u32, fx: f32, fy: f32) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_f32::<LittleEndian>(FLO_MAGIC)?;
    out.write_i32::<LittleEndian>(width as i32)?;
    out.write_i32::<LittleEndian>(height as i32)?;
    for _ in 0..(width as usize * height as usize) {
        out.write_f32::<LittleEndian>(fx)?;
        out.write_f32::<LittleEndian>(fy)?;
    }
    out.flush()?;
    Ok(())
}
