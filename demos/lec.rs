use clap::{Parser, ValueEnum};

use gate_rs::builder::SubnetBuilder;
use gate_rs::celltype::CellSymbol;
use gate_rs::checker::{Checker, CheckerStatus, Strategy};
use gate_rs::link::Link;
use gate_rs::miter::Binding;
use gate_rs::subnet::Subnet;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Engine {
    Simulation,
    Sat,
    Fraig,
    Cut,
    All,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Adder width in bits.
    #[arg(value_name = "INT", default_value = "8")]
    n: usize,

    /// Checking strategy.
    #[clap(long, value_enum, default_value = "all")]
    engine: Engine,

    /// Flip the carry into the top bit of the second adder.
    #[clap(long)]
    broken: bool,
}

/// Ripple-carry adder out of XOR/MAJ cells: inputs a[0..n], b[0..n],
/// outputs sum[0..n] and the carry out.
fn adder_maj(n: usize) -> std::rc::Rc<Subnet> {
    let mut builder = SubnetBuilder::new();
    let a = builder.add_inputs(n);
    let b = builder.add_inputs(n);
    let mut carry = None;
    let mut sums = Vec::with_capacity(n + 1);
    for i in 0..n {
        match carry {
            None => {
                sums.push(builder.add_cell(CellSymbol::Xor, &[a[i], b[i]]));
                carry = Some(builder.add_cell(CellSymbol::And, &[a[i], b[i]]));
            }
            Some(c) => {
                sums.push(builder.add_cell(CellSymbol::Xor, &[a[i], b[i], c]));
                carry = Some(builder.add_cell(CellSymbol::Maj, &[a[i], b[i], c]));
            }
        }
    }
    sums.extend(carry);
    builder.add_outputs(&sums);
    builder.make(false)
}

/// The same adder out of two-input AND/OR/XOR gates.
fn adder_gates(n: usize, broken: bool) -> std::rc::Rc<Subnet> {
    let mut builder = SubnetBuilder::new();
    let a = builder.add_inputs(n);
    let b = builder.add_inputs(n);
    let mut carry: Option<Link> = None;
    let mut sums = Vec::with_capacity(n + 1);
    for i in 0..n {
        let p = builder.add_cell(CellSymbol::Xor, &[a[i], b[i]]);
        let g = builder.add_cell(CellSymbol::And, &[a[i], b[i]]);
        match carry {
            None => {
                sums.push(p);
                carry = Some(g);
            }
            Some(c) => {
                let c = if broken && i + 1 == n { !c } else { c };
                sums.push(builder.add_cell(CellSymbol::Xor, &[p, c]));
                let t = builder.add_cell(CellSymbol::And, &[p, c]);
                carry = Some(builder.add_cell(CellSymbol::Or, &[g, t]));
            }
        }
    }
    sums.extend(carry);
    builder.add_outputs(&sums);
    builder.make(false)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Cli::parse();
    println!("args = {:?}", args);

    let n = args.n;
    let lhs = adder_maj(n);
    let rhs = adder_gates(n, args.broken);
    println!("lhs: {} cells, path length {:?}", lhs.cell_num(), lhs.path_length());
    println!("rhs: {} cells, path length {:?}", rhs.cell_num(), rhs.path_length());

    let strategies: Vec<Strategy> = match args.engine {
        Engine::Simulation => vec![Strategy::Simulation],
        Engine::Sat => vec![Strategy::Sat],
        Engine::Fraig => vec![Strategy::Fraig],
        Engine::Cut => vec![Strategy::Cut],
        Engine::All => Strategy::ALL.to_vec(),
    };

    let binding = Binding::identity(2 * n, n + 1);
    for strategy in strategies {
        let time = std::time::Instant::now();
        let result = strategy.checker().are_equal(&lhs, &rhs, &binding);
        println!("{}: {} in {:?}", strategy, result.status, time.elapsed());
        if result.status == CheckerStatus::NotEqual {
            if let Some(cex) = result.counterexample() {
                let bits: String = cex.iter().map(|&b| if b { '1' } else { '0' }).collect();
                println!("  counterexample: {}", bits);
            }
        }
    }

    Ok(())
}
