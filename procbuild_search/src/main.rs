// Procbuild inverse search: CLI entry point.
//
// Loads a shape grammar and a target line drawing, runs one of the searches,
// and writes progress artifacts to a results directory:
// - mcts: `visits.txt` (one line per decision), `result_<step>.png`
//   previews of the partial derivation over the target, `final.png`,
//   `best_grammar.json`
// - mcmc: `result_<iter>.png` snapshots, `scores.csv`, `final.png`,
//   `best_grammar.json`
// - render: `building_<i>.png` + `building_<i>.json` random buildings
//
// Usage:
//   cargo run -p procbuild_search --bin inverse -- mcts <grammar.json> <target.png>
//     [--steps N] [--iterations N]
//   cargo run -p procbuild_search --bin inverse -- mcmc <grammar.json> <target.png>
//     [--iterations N]
//   cargo run -p procbuild_search --bin inverse -- render <grammar.json>
//     [--count N] [--shaded]
//
// Common flags: --config FILE, --seed N, --out DIR

use image::GrayImage;
use image::imageops::{FilterType, resize};
use procbuild_grammar::{Grammar, Shape, State};
use procbuild_search::config::{RenderConfig, SearchConfig};
use procbuild_search::evaluate::{Evaluator, random_building};
use procbuild_search::mcmc::replica_exchange;
use procbuild_search::mcts::inverse_mcts;
use procbuild_search::render::{RenderMode, Renderer, SoftwareRenderer, compose_preview};
use procbuild_search::{Result, SearchContext};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &["--config", "--seed", "--out", "--steps", "--iterations", "--count"];

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("");

    let result = match command {
        "mcts" => run_mcts(&args),
        "mcmc" => run_mcmc(&args),
        "render" => run_render(&args),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  inverse mcts <grammar.json> <target.png> [--steps N] [--iterations N]");
    eprintln!("  inverse mcmc <grammar.json> <target.png> [--iterations N]");
    eprintln!("  inverse render <grammar.json> [--count N] [--shaded]");
    eprintln!("Common flags: --config FILE  --seed N  --out DIR");
}

fn run_mcts(args: &[String]) -> Result<()> {
    let (grammar_path, target_path) = grammar_and_target(args);
    let mut config = load_config(args)?;
    if let Some(steps) = parse_flag(args, "--steps") {
        config.mcts.max_derivation_steps = steps;
    }
    if let Some(iterations) = parse_flag(args, "--iterations") {
        config.mcts.max_iterations = iterations;
    }
    let out_dir = out_dir(args, "results")?;
    let (mut ctx, seed) = SearchContext::from_optional_seed(config.seed);

    println!("=== Procbuild Inverse Search (MCTS) ===");
    println!("Grammar: {}", grammar_path.display());
    println!("Target: {}", target_path.display());
    println!("Output: {}", out_dir.display());
    println!("Seed: {}", seed);
    println!(
        "Outer steps: {}, iterations per step: {}",
        config.mcts.max_derivation_steps, config.mcts.max_iterations
    );
    println!();

    println!("[1/4] Loading grammar...");
    let grammar = load_grammar(&grammar_path)?;
    println!("  {} attributes, {} rules.", grammar.attrs.len(), grammar.rules.len());

    println!("[2/4] Loading target...");
    let target = load_target(&target_path, &config.render)?;
    let mut evaluator = Evaluator::new(
        renderer_for(&config.render),
        &target,
        config.metric.clone(),
        config.derivation.clone(),
    )?;
    println!("  {} edge pixels.", evaluator.target().edge_count());

    println!("[3/4] Searching...");
    let mut visits = File::create(out_dir.join("visits.txt"))?;
    let mut preview_renderer = renderer_for(&config.render);
    let threshold = config.metric.edge_threshold;
    let result = inverse_mcts(&grammar, &mut evaluator, &config.mcts, &mut ctx, |record, state| {
        println!(
            "  Step {}: action {} (value {:.4}, {} iterations, {} children)",
            record.step,
            record.chosen_action,
            record.best_value,
            record.iterations,
            record.children.len()
        );
        if let Err(e) = writeln!(visits, "{}", record.visits_line()) {
            eprintln!("  Warning: could not write visits.txt: {}", e);
        }
        let drawing = preview_renderer.render(&state.faces(true), RenderMode::Line);
        let path = out_dir.join(format!("result_{}.png", record.step));
        if let Err(e) = save_preview(&target, &drawing, threshold, &path) {
            eprintln!("  Warning: could not write {}: {}", path.display(), e);
        }
    })?;
    println!("  {} decisions, final value {:.4}.", result.steps.len(), result.best_value);
    if !result.state.is_complete() {
        println!("  {} nonterminals still pending.", result.state.queue.len());
    }

    println!("[4/4] Writing results...");
    let drawing = evaluator.render_state(&result.state, RenderMode::Line, true);
    save_preview(&target, &drawing, threshold, &out_dir.join("final.png"))?;
    fs::write(out_dir.join("best_grammar.json"), result.state.grammar.to_json()?)?;
    print_stats(&ctx);
    Ok(())
}

fn run_mcmc(args: &[String]) -> Result<()> {
    let (grammar_path, target_path) = grammar_and_target(args);
    let mut config = load_config(args)?;
    if let Some(iterations) = parse_flag(args, "--iterations") {
        config.mcmc.iterations = iterations;
    }
    let out_dir = out_dir(args, "results_mcmc")?;
    let (mut ctx, seed) = SearchContext::from_optional_seed(config.seed);

    println!("=== Procbuild Inverse Search (MCMC) ===");
    println!("Grammar: {}", grammar_path.display());
    println!("Target: {}", target_path.display());
    println!("Output: {}", out_dir.display());
    println!("Seed: {}", seed);
    println!(
        "Iterations: {}, temperatures: {} / {}",
        config.mcmc.iterations, config.mcmc.low_temperature, config.mcmc.high_temperature
    );
    println!();

    println!("[1/4] Loading grammar...");
    let grammar = load_grammar(&grammar_path)?;
    println!("  {} attributes, {} rules.", grammar.attrs.len(), grammar.rules.len());

    println!("[2/4] Loading target...");
    let target = load_target(&target_path, &config.render)?;
    let mut evaluator = Evaluator::new(
        renderer_for(&config.render),
        &target,
        config.metric.clone(),
        config.derivation.clone(),
    )?;

    println!("[3/4] Sampling...");
    let mut scores = File::create(out_dir.join("scores.csv"))?;
    writeln!(scores, "iteration,best_energy")?;
    let mut preview_renderer = renderer_for(&config.render);
    let threshold = config.metric.edge_threshold;
    let limits = config.derivation.clone();
    let result = replica_exchange(&grammar, &mut evaluator, &config.mcmc, &mut ctx, |snap| {
        println!(
            "  Iteration {}: best energy {:.5} (T = {:.3} / {:.3})",
            snap.iteration, snap.best_energy, snap.temperatures[0], snap.temperatures[1]
        );
        if let Err(e) = writeln!(scores, "{},{}", snap.iteration, snap.best_energy) {
            eprintln!("  Warning: could not write scores.csv: {}", e);
        }
        let mut state = State::new(Shape::axiom(), snap.best_grammar.clone());
        if let Err(e) = state.derive_to_completion(&limits) {
            eprintln!("  Warning: could not derive snapshot: {}", e);
            return;
        }
        let drawing = preview_renderer.render(&state.faces(false), RenderMode::Line);
        let path = out_dir.join(format!("result_{}.png", snap.iteration));
        if let Err(e) = save_preview(&target, &drawing, threshold, &path) {
            eprintln!("  Warning: could not write {}: {}", path.display(), e);
        }
    })?;
    println!("  Best energy: {:.5}", result.best_energy);
    println!(
        "  Swaps: {} / {} accepted",
        result.swaps_accepted, result.swaps_attempted
    );
    for (i, chain) in result.chains.iter().enumerate() {
        println!(
            "  Chain {}: accepted {} / {} ({:.1}%), final T = {:.3}",
            i,
            chain.accepted,
            chain.proposals,
            percent(chain.accepted, chain.proposals),
            chain.temperature
        );
    }

    println!("[4/4] Writing results...");
    let drawing = evaluator.render_grammar(&result.best_grammar, RenderMode::Line)?;
    save_preview(&target, &drawing, threshold, &out_dir.join("final.png"))?;
    fs::write(out_dir.join("best_grammar.json"), result.best_grammar.to_json()?)?;
    for (name, value) in result.best_grammar.parameter_values() {
        println!("  {} = {}", name, value);
    }
    print_stats(&ctx);
    Ok(())
}

fn run_render(args: &[String]) -> Result<()> {
    let Some(grammar_path) = positionals(args).first().map(PathBuf::from) else {
        print_usage();
        std::process::exit(2);
    };
    let config = load_config(args)?;
    let count: usize = parse_flag(args, "--count").unwrap_or(1);
    let mode = if args.iter().any(|a| a == "--shaded") {
        RenderMode::Shaded
    } else {
        RenderMode::Line
    };
    let out_dir = out_dir(args, "generated")?;
    let (mut ctx, seed) = SearchContext::from_optional_seed(config.seed);

    println!("=== Procbuild Random Buildings ===");
    println!("Grammar: {}", grammar_path.display());
    println!("Output: {}", out_dir.display());
    println!("Seed: {}", seed);
    println!();

    println!("[1/2] Loading grammar...");
    let grammar = load_grammar(&grammar_path)?;

    println!("[2/2] Rendering {} building(s)...", count);
    let mut renderer = renderer_for(&config.render);
    for i in 0..count {
        let (params, state, outcome) = random_building(&grammar, &mut ctx.rng, &config.derivation)?;
        let img = renderer.render(&state.faces(false), mode);
        img.save(out_dir.join(format!("building_{}.png", i)))?;
        fs::write(out_dir.join(format!("building_{}.json", i)), params.to_json()?)?;
        let note = if outcome.is_truncated() {
            format!(" (truncated: {:?})", outcome.stop)
        } else {
            String::new()
        };
        println!("  building_{}: {} expansions, {} nodes{}", i, outcome.expansions, state.tree.len(), note);
    }
    Ok(())
}

fn grammar_and_target(args: &[String]) -> (PathBuf, PathBuf) {
    let pos = positionals(args);
    match (pos.first(), pos.get(1)) {
        (Some(g), Some(t)) => (PathBuf::from(g), PathBuf::from(t)),
        _ => {
            print_usage();
            std::process::exit(2);
        }
    }
}

/// Arguments after the command that are neither flags nor flag values.
fn positionals(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args.iter().skip(2) {
        if skip {
            skip = false;
        } else if VALUE_FLAGS.contains(&arg.as_str()) {
            skip = true;
        } else if !arg.starts_with("--") {
            out.push(arg.as_str());
        }
    }
    out
}

fn load_config(args: &[String]) -> Result<SearchConfig> {
    let mut config = match parse_flag::<String>(args, "--config") {
        Some(path) => SearchConfig::load(Path::new(&path))?,
        None => SearchConfig::default(),
    };
    if let Some(seed) = parse_flag(args, "--seed") {
        config.seed = Some(seed);
    }
    Ok(config)
}

fn load_grammar(path: &Path) -> Result<Grammar> {
    Ok(Grammar::from_json(&fs::read_to_string(path)?)?)
}

/// Load the target as grayscale, resized to the render size if needed.
fn load_target(path: &Path, render: &RenderConfig) -> Result<GrayImage> {
    let img = image::open(path)?.to_luma8();
    if img.dimensions() == (render.width, render.height) {
        return Ok(img);
    }
    println!(
        "  Resizing target from {}x{} to {}x{}.",
        img.width(),
        img.height(),
        render.width,
        render.height
    );
    Ok(resize(&img, render.width, render.height, FilterType::Triangle))
}

fn out_dir(args: &[String], default: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(parse_flag::<String>(args, "--out").unwrap_or_else(|| default.to_string()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn renderer_for(render: &RenderConfig) -> SoftwareRenderer {
    SoftwareRenderer::new(render.width, render.height, render.camera.clone())
}

fn save_preview(target: &GrayImage, drawing: &GrayImage, threshold: u8, path: &Path) -> Result<()> {
    compose_preview(target, drawing, threshold)?.save(path)?;
    Ok(())
}

fn print_stats(ctx: &SearchContext) {
    let s = &ctx.stats;
    println!();
    println!("Derivations: {} ({} truncated), expansions: {}", s.derivations, s.truncated_derivations, s.expansions);
    println!("Renders: {}", s.renders);
    println!(
        "Time: derive {:.2}s, render {:.2}s, score {:.2}s",
        s.derive_time.as_secs_f64(),
        s.render_time.as_secs_f64(),
        s.score_time.as_secs_f64()
    );
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { 100.0 * part as f64 / total as f64 }
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
