//! hybrid-pt CLI - renders the demo world progressively and writes an EXR.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use hybrid_pt::prelude::*;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "chrome-trace")]
type TraceGuard = tracing_chrome::FlushGuard;
#[cfg(not(feature = "chrome-trace"))]
type TraceGuard = ();

struct Args {
    width: u32,
    height: u32,
    frames: u32,
    output: PathBuf,
    config: Option<PathBuf>,
    save_config: Option<PathBuf>,
    overrides: Vec<(String, String)>,
    hardware: bool,
    animate: bool,
    log_level: &'static str,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            frames: 16,
            output: PathBuf::from("hybrid-pt.exr"),
            config: None,
            save_config: None,
            overrides: Vec::new(),
            hardware: true,
            animate: false,
            log_level: "info",
        }
    }
}

fn print_usage(program: &str) {
    println!("hybrid-pt {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: {program} [options]");
    println!();
    println!("Options:");
    println!("  -W, --width <px>          Image width (default 320)");
    println!("  -H, --height <px>         Image height (default 180)");
    println!("  -n, --frames <n>          Frames to accumulate (default 16)");
    println!("  -o, --output <file.exr>   Output image (default hybrid-pt.exr)");
    println!("  -c, --config <file.json>  Load settings");
    println!("      --save-config <file>  Write the effective settings and exit");
    println!("  -s, --set <key=value>     Override one setting (repeatable)");
    println!("      --no-hardware         Run without a hardware backend");
    println!("      --animate             Move the dynamic light every frame");
    println!("  -v, --verbose / -q, --quiet");
    println!();
    println!("Environment: RUST_LOG filters logging, HYBRID_PT_TRACE=1 writes trace.json");
    println!("(with the chrome-trace feature).");
}

fn next_value<'a>(it: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a str> {
    it.next()
        .map(String::as_str)
        .with_context(|| format!("{flag} expects a value"))
}

fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut out = Args::default();
    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-W" | "--width" => out.width = next_value(&mut it, arg)?.parse()?,
            "-H" | "--height" => out.height = next_value(&mut it, arg)?.parse()?,
            "-n" | "--frames" => out.frames = next_value(&mut it, arg)?.parse()?,
            "-o" | "--output" => out.output = next_value(&mut it, arg)?.into(),
            "-c" | "--config" => out.config = Some(next_value(&mut it, arg)?.into()),
            "--save-config" => out.save_config = Some(next_value(&mut it, arg)?.into()),
            "-s" | "--set" => {
                let kv = next_value(&mut it, arg)?;
                let (k, v) = kv
                    .split_once('=')
                    .with_context(|| format!("--set expects key=value, got '{kv}'"))?;
                out.overrides.push((k.to_string(), v.to_string()));
            }
            "--no-hardware" => out.hardware = false,
            "--animate" => out.animate = true,
            "-v" | "--verbose" => out.log_level = "debug",
            "-vv" | "--trace" => out.log_level = "trace",
            "-q" | "--quiet" => out.log_level = "warn",
            other => bail!("unknown option '{other}'"),
        }
    }
    if out.width == 0 || out.height == 0 {
        bail!("image size must be non-zero");
    }
    Ok(Some(out))
}

fn init_tracing(default_level: &str) -> Option<TraceGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    #[cfg(feature = "chrome-trace")]
    {
        if env::var("HYBRID_PT_TRACE").ok().as_deref() == Some("1") {
            let (chrome, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file("trace.json")
                .build();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt)
                .with(chrome)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::registry().with(filter).with(fmt).init();
    None
}

/// Axis-aligned block standing on the floor (four sides and a top).
fn add_block(b: &mut WorldBuilder, min: Vec3, max: Vec3, material: MaterialId) {
    let p = Vec3::new;
    let (x0, y0, z0) = (min.x, min.y, min.z);
    let (x1, y1, z1) = (max.x, max.y, max.z);
    b.add_quad([p(x0, y0, z1), p(x1, y0, z1), p(x1, y1, z1), p(x0, y1, z1)], material);
    b.add_quad([p(x0, y0, z0), p(x1, y0, z0), p(x1, y0, z1), p(x0, y0, z1)], material);
    b.add_quad([p(x1, y1, z0), p(x0, y1, z0), p(x0, y1, z1), p(x1, y1, z1)], material);
    b.add_quad([p(x0, y1, z0), p(x0, y0, z0), p(x0, y0, z1), p(x0, y1, z1)], material);
    b.add_quad([p(x1, y0, z0), p(x1, y1, z0), p(x1, y1, z1), p(x1, y0, z1)], material);
}

/// A 512-unit room with two blocks, a ceiling light entity and a targeted spot.
fn demo_world() -> World {
    let mut b = WorldBuilder::new("demo_room").entities(
        r#"{
"classname" "worldspawn"
"message" "hybrid-pt demo"
}
{
"classname" "light"
"origin" "256 256 480"
"light" "4"
"radius" "600"
"_color" "255 230 200"
}
{
"classname" "light_spot"
"origin" "64 64 400"
"light" "6"
"radius" "500"
"target" "t1"
"angle" "25"
}
{
"classname" "info_null"
"targetname" "t1"
"origin" "320 320 0"
}"#,
    );
    let walls = b.add_material(Material::default());
    let red = b.add_material(Material {
        base_color: Vec3::new(0.7, 0.1, 0.1),
        roughness: 0.8,
        ..Default::default()
    });
    let metal = b.add_material(Material {
        base_color: Vec3::new(0.9, 0.8, 0.5),
        metallic: 1.0,
        roughness: 0.25,
        ..Default::default()
    });
    b.add_room(Vec3::ZERO, Vec3::splat(512.0), walls);
    add_block(&mut b, Vec3::new(96.0, 288.0, 0.0), Vec3::new(192.0, 384.0, 160.0), red);
    add_block(&mut b, Vec3::new(320.0, 128.0, 0.0), Vec3::new(384.0, 192.0, 256.0), metal);
    b.build()
}

fn run(args: Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    for (k, v) in &args.overrides {
        settings.apply(k, v).with_context(|| format!("--set {k}={v}"))?;
    }
    if let Some(path) = &args.save_config {
        settings.save_to(path)?;
        println!("settings written to {}", path.display());
        return Ok(());
    }

    let hardware: Option<Box<dyn HardwareBackend>> = args
        .hardware
        .then(|| Box::new(EmulatedHardware::new()) as Box<dyn HardwareBackend>);
    let mut pt = PathTracer::new(settings, hardware);
    pt.load_world(demo_world());

    let light = pt
        .lights_mut()
        .allocate(Light::point(Vec3::new(400.0, 400.0, 200.0), Vec3::new(0.6, 0.7, 1.0), 3.0, 400.0))
        .context("light pool exhausted")?;

    let camera = Camera::look_at(
        Vec3::new(480.0, 32.0, 200.0),
        Vec3::new(200.0, 320.0, 96.0),
        Vec3::Z,
    )
    .with_fov(70.0);

    tracing::info!(
        width = args.width,
        height = args.height,
        frames = args.frames,
        backend = %pt.hardware_status(),
        "rendering"
    );
    let start = std::time::Instant::now();
    for frame in 0..args.frames {
        if args.animate {
            let phase = frame as f32 * 0.2;
            pt.lights_mut().update(light, |l| {
                l.origin = Vec3::new(256.0 + 150.0 * phase.cos(), 256.0 + 150.0 * phase.sin(), 200.0);
            });
        }
        let stats = pt.render_frame(&camera, args.width, args.height);
        tracing::debug!(
            frame = stats.frame,
            tiles = stats.tiles,
            pixels = stats.pixels,
            lights = stats.scene_lights,
            reset = stats.reset,
            hardware = stats.hardware,
            "frame done"
        );
    }
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "render finished");

    let data: Vec<f32> = pt.color().iter().flat_map(|c| c.to_array()).collect();
    let img = image::Rgb32FImage::from_raw(args.width, args.height, data)
        .context("output buffer does not match image size")?;
    img.save(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!("{}", pt.status_report());
    println!("wrote {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let argv: Vec<String> = env::args().collect();
    let Some(args) = parse_args(&argv)? else {
        print_usage(&argv[0]);
        return Ok(());
    };
    let _guard = init_tracing(args.log_level);
    run(args)
}
