use anyhow::{bail, Result};
use corta_mato::{
    init_tracing, parse_birth_date, roster::parse_processo, ArrivalOutcome, Config, ListFilter,
    NewRegistration, ParticipantRef, Registration, RegistrationDesk, VERSION,
};
use std::env;
use std::fs;
use std::path::Path;

const USAGE: &str = "\
Usage: corta-mato [--admin] <command> [args]

Commands:
  lookup <processo>                     Show a student from the roster
  search <nome>                         Search the roster by name
  register <processo>                   Register a student from the roster
  register-manual <processo> <nome> <data> <género> <turma>
  list [escalão]                        List registrations
  categories                            Categories with registrations
  arrive <processo>                     Record a finish-line arrival
  dorsal <processo> <ficheiro>          Write the dorsal image to a file
  export <inscricoes.csv> [dorsais.zip] Bulk export
Admin commands (need --admin):
  standings [escalão] [género]          Finish order
  time <processo|nome> <tempo>          Record elapsed time (HH:MM:SS)
  delete <processo>                     Remove a registration
  import <inscricoes.csv>               Replace the ledger with a CSV dump
  clear                                 Remove every registration

Configuration comes from CORTA_MATO_* environment variables.";

fn main() -> Result<()> {
    init_tracing();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let admin = match args.iter().position(|a| a == "--admin") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };

    let Some(command) = args.first().cloned() else {
        println!("🏃 Corta-Mato v{}\n\n{}", VERSION, USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let config = Config::from_env();
    let desk = RegistrationDesk::open(&config)?;

    match command.as_str() {
        "lookup" => {
            let p = desk.lookup(processo_arg(rest, 0)?)?;
            println!("{} | {} | {} | {} | {}", p.processo, p.nome, p.data_nascimento, p.genero, p.turma);
        }
        "search" => {
            let query = rest.join(" ");
            let hits = desk.search(&query);
            for p in &hits {
                println!("{} | {} | {}", p.processo, p.nome, p.turma);
            }
            println!("✓ {} result(s)", hits.len());
        }
        "register" => {
            let reg = desk.register(processo_arg(rest, 0)?)?;
            print_registered(&reg, &desk);
        }
        "register-manual" => {
            if rest.len() < 5 {
                bail!("register-manual needs <processo> <nome> <data> <género> <turma>");
            }
            let reg = desk.register_manual(NewRegistration {
                processo: parse_processo(&rest[0])?,
                nome: rest[1].clone(),
                data_nascimento: parse_birth_date(&rest[2])?,
                genero: rest[3].clone(),
                turma: rest[4].clone(),
            })?;
            print_registered(&reg, &desk);
        }
        "list" => {
            let filter = ListFilter {
                escalao: rest.first().cloned(),
                ..ListFilter::default()
            };
            let registrations = desk.list(&filter)?;
            for reg in &registrations {
                print_row(reg);
            }
            println!("✓ {} registration(s)", registrations.len());
        }
        "categories" => {
            for label in desk.categories()? {
                println!("{}", label);
            }
        }
        "arrive" => {
            let processo = processo_arg(rest, 0)?;
            match desk.record_arrival(processo)? {
                ArrivalOutcome::Classified(position) => {
                    println!("🏁 {} classified in position {}", processo, position)
                }
                ArrivalOutcome::AlreadyClassified(position) => {
                    println!("⚠️  {} was already classified in position {}", processo, position)
                }
            }
        }
        "dorsal" => {
            let processo = processo_arg(rest, 0)?;
            let Some(target) = rest.get(1) else {
                bail!("dorsal needs <processo> <ficheiro>");
            };
            fs::write(target, desk.dorsal_image(processo)?)?;
            println!("✓ Dorsal written to {}", target);
        }
        "export" => {
            let Some(csv_path) = rest.first() else {
                bail!("export needs <inscricoes.csv>");
            };
            desk.export_csv(fs::File::create(csv_path)?)?;
            println!("✓ Ledger exported to {}", csv_path);

            if let Some(zip_path) = rest.get(1) {
                fs::write(zip_path, desk.dorsal_archive()?)?;
                println!("✓ Dorsais archived to {}", zip_path);
            }
        }
        "standings" => {
            let filter = ListFilter {
                escalao: rest.first().cloned(),
                genero: rest.get(1).cloned(),
                nome: None,
            };
            for standing in desk.standings(admin, &filter)? {
                print!("{:>3}. ", standing.rank);
                print_row(&standing.registration);
            }
        }
        "time" => {
            if rest.len() < 2 {
                bail!("time needs <processo|nome> <tempo>");
            }
            let who = ParticipantRef::parse(&rest[..rest.len() - 1].join(" "))?;
            let reg = desk.record_time(admin, &who, &rest[rest.len() - 1])?;
            println!("⏱️  Time recorded for {}: {}", reg.nome, reg.tempo.unwrap_or_default());
        }
        "delete" => {
            let processo = processo_arg(rest, 0)?;
            desk.delete(admin, processo)?;
            println!("✓ Registration {} deleted", processo);
        }
        "import" => {
            let Some(csv_path) = rest.first() else {
                bail!("import needs <inscricoes.csv>");
            };
            let count = desk.import_csv(admin, fs::File::open(Path::new(csv_path))?)?;
            println!("✓ Imported {} registration(s)", count);
        }
        "clear" => {
            let removed = desk.clear_all(admin)?;
            println!("🗑️  Removed {} registration(s)", removed);
        }
        other => {
            eprintln!("❌ Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn processo_arg(rest: &[String], idx: usize) -> Result<i64> {
    match rest.get(idx) {
        Some(raw) => Ok(parse_processo(raw)?),
        None => bail!("missing <processo> argument"),
    }
}

fn print_registered(reg: &Registration, desk: &RegistrationDesk) {
    println!("✅ {} registered (Nº {}, {})", reg.nome, reg.processo, reg.escalao);
    println!("   Dorsal: {:?}", desk.ledger().dorsais().path_for(reg.processo));
}

fn print_row(reg: &Registration) {
    println!(
        "{} | {} | {} | {} | {} | {} | {}",
        reg.processo,
        reg.nome,
        reg.genero,
        reg.turma,
        reg.escalao,
        reg.tempo.as_deref().unwrap_or("-"),
        reg.classificacao.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
    );
}
