//! CairnDB - CLI Client

use anyhow::{anyhow, bail, Context};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use cairndb::catalog::DataType;
use cairndb::storage::{Table, Value};
use cairndb::{DatabaseConfig, ExecutionEngine, SelectQuery};

/// Print welcome banner
fn print_banner(name: &str) {
    println!(
        r#"
   ____      _            ____  ____
  / ___|__ _(_)_ __ _ __ |  _ \| __ )
 | |   / _` | | '__| '_ \| | | |  _ \
 | |__| (_| | | |  | | | | |_| | |_) |
  \____\__,_|_|_|  |_| |_|____/|____/

 Database '{}'
 Type '.help' for help, '.quit' to exit
"#,
        name
    );
}

/// Print help message
fn print_help() {
    println!(
        r#"
Commands:
  .help                   Show this help message
  .quit                   Exit CairnDB
  .tables                 List all tables
  .schema [table]         Show table schema
  .show <table>           Print every live row
  .journal [n]            Show the last n commands

Operators:
  create <table> <col:type,...> [pk]
  drop <table>
  insert <table> <v1,v2,...>
  update <table> <col> <value> <condition>
  delete <table> <condition>
  select <cols|*|distinct cols> from <table> [where <cond>] [order <col> [desc]] [limit n] [save <name>]
  join <left> <right> <condition> [save <name>]
  sort <table> <col> [asc|desc]
  index <name> <table>      dropindex <name>
  cast <table> <col> <type>
  trigger <name> <table> <insert|update|delete> <before|after>
  droptrigger <name>
  lock <table>              unlock <table> [force]
  import <table> <file> [type,...] [pk]
  export <table> [file]

Examples:
  create people id:int,name:str,age:int id
  insert people 1,alice,30
  select name,age from people where age>20 order age desc
"#
    );
}

/// Format a table as a grid
fn format_results(table: &Table) -> String {
    let columns = table.schema().column_names();
    let rows: Vec<Vec<String>> = table
        .live_rows()
        .map(|(_, row)| row.values().iter().map(Value::to_string).collect())
        .collect();

    // Calculate column widths
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in &rows {
        for (i, value) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(value.len());
            }
        }
    }

    let mut output = String::new();

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    // Header
    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    // Rows
    for row in &rows {
        let row_str: String = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v, width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }

    if !rows.is_empty() {
        output.push_str(&separator);
    }

    output.push_str(&format!("{} row(s) returned\n", rows.len()));
    output
}

fn parse_columns(spec: &str) -> anyhow::Result<(Vec<String>, Vec<DataType>)> {
    let mut names = Vec::new();
    let mut types = Vec::new();
    for part in spec.split(',') {
        let (name, ty) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("column '{}' must be written as name:type", part))?;
        names.push(name.trim().to_string());
        types.push(ty.trim().parse::<DataType>()?);
    }
    Ok((names, types))
}

fn parse_types(spec: &str) -> anyhow::Result<Vec<DataType>> {
    spec.split(',')
        .map(|t| t.trim().parse::<DataType>().map_err(anyhow::Error::from))
        .collect()
}

fn parse_values(spec: &str) -> Vec<Value> {
    spec.split(',').map(|v| Value::from(v.trim())).collect()
}

fn arg<'a>(args: &[&'a str], i: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(i).copied().ok_or_else(|| anyhow!("missing {}", what))
}

fn run_select(engine: &mut ExecutionEngine, args: &[&str]) -> anyhow::Result<()> {
    let from = args
        .iter()
        .position(|a| a.eq_ignore_ascii_case("from"))
        .context("select needs 'from <table>'")?;
    let columns = args[..from].join(" ");
    let table = arg(args, from + 1, "table name")?;

    let mut query = SelectQuery::new(&columns, table);
    let mut i = from + 2;
    while i < args.len() {
        match args[i].to_ascii_lowercase().as_str() {
            "where" => {
                query = query.condition(arg(args, i + 1, "condition")?);
                i += 2;
            }
            "order" => {
                query = query.order_by(arg(args, i + 1, "order column")?);
                i += 2;
                if args.get(i).map_or(false, |a| a.eq_ignore_ascii_case("desc")) {
                    query = query.descending(true);
                    i += 1;
                }
            }
            "limit" => {
                query = query.limit(arg(args, i + 1, "limit")?.parse::<usize>()?);
                i += 2;
            }
            "save" => {
                query = query.save_as(arg(args, i + 1, "table name")?);
                i += 2;
            }
            other => bail!("unexpected '{}' in select", other),
        }
    }

    print!("{}", format_results(&engine.select(query)?));
    Ok(())
}

/// Execute one operator command
fn execute(engine: &mut ExecutionEngine, line: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = parts.split_first() else {
        return Ok(());
    };

    match command.to_ascii_lowercase().as_str() {
        "create" => {
            let (names, types) = parse_columns(arg(args, 1, "columns")?)?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            engine.create_table(arg(args, 0, "table name")?, &names, &types, args.get(2).copied())?;
            println!("Table created");
        }
        "drop" => {
            engine.drop_table(arg(args, 0, "table name")?)?;
            println!("Table dropped");
        }
        "insert" => {
            let pos = engine.insert(arg(args, 0, "table name")?, parse_values(arg(args, 1, "values")?))?;
            println!("Inserted at position {}", pos);
        }
        "update" => {
            let changed = engine.update(
                arg(args, 0, "table name")?,
                arg(args, 1, "column")?,
                Value::from(arg(args, 2, "value")?),
                arg(args, 3, "condition")?,
            )?;
            println!("{}", if changed { "Rows updated" } else { "No rows matched" });
        }
        "delete" => {
            let deleted = engine.delete(arg(args, 0, "table name")?, arg(args, 1, "condition")?)?;
            println!("{} row(s) deleted", deleted.len());
        }
        "select" => run_select(engine, args)?,
        "join" => {
            let save_as = match args.get(3) {
                Some(kw) if kw.eq_ignore_ascii_case("save") => Some(arg(args, 4, "table name")?),
                Some(other) => bail!("unexpected '{}' in join", other),
                None => None,
            };
            let result = engine.join(
                "inner",
                arg(args, 0, "left table")?,
                arg(args, 1, "right table")?,
                arg(args, 2, "condition")?,
                save_as,
            )?;
            print!("{}", format_results(&result));
        }
        "sort" => {
            let ascending = args.get(2).map_or(true, |d| !d.eq_ignore_ascii_case("desc"));
            engine.sort(arg(args, 0, "table name")?, arg(args, 1, "column")?, ascending)?;
            println!("Table sorted");
        }
        "index" => {
            engine.create_index(arg(args, 0, "index name")?, arg(args, 1, "table name")?)?;
            println!("Index created");
        }
        "dropindex" => {
            engine.drop_index(arg(args, 0, "index name")?)?;
            println!("Index dropped");
        }
        "cast" => {
            let data_type: DataType = arg(args, 2, "type")?.parse()?;
            engine.cast_column(arg(args, 0, "table name")?, arg(args, 1, "column")?, data_type)?;
            println!("Column cast");
        }
        "trigger" => {
            engine.create_trigger(
                arg(args, 0, "trigger name")?,
                arg(args, 1, "table name")?,
                arg(args, 2, "action")?,
                arg(args, 3, "timing")?,
            )?;
            println!("Trigger created");
        }
        "droptrigger" => {
            engine.drop_trigger(arg(args, 0, "trigger name")?)?;
            println!("Trigger dropped");
        }
        "lock" => {
            let table = arg(args, 0, "table name")?;
            if engine.lock_table(table)? {
                println!("Locked '{}'", table);
            } else {
                println!("'{}' is already held by this process", table);
            }
        }
        "unlock" => {
            let force = args.get(1).map_or(false, |f| f.eq_ignore_ascii_case("force"));
            engine.unlock_table(arg(args, 0, "table name")?, force)?;
            println!("Unlocked");
        }
        "import" => {
            let types = args.get(2).map(|t| parse_types(t)).transpose()?;
            let count = engine.import_csv(
                arg(args, 0, "table name")?,
                arg(args, 1, "file")?,
                types.as_deref(),
                args.get(3).copied(),
            )?;
            println!("{} row(s) imported", count);
        }
        "export" => {
            let path = args.get(1).map(std::path::Path::new);
            let written = engine.export_csv(arg(args, 0, "table name")?, path)?;
            println!("Wrote {}", written.display());
        }
        other => {
            bail!("unknown command '{}', type '.help' for available commands", other);
        }
    }
    Ok(())
}

/// Handle special dot commands; returns false on quit
fn handle_special_command(engine: &mut ExecutionEngine, cmd: &str, journal: &[String]) -> anyhow::Result<bool> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();

    match parts.first().copied() {
        Some(".help") => print_help(),
        Some(".quit") | Some(".exit") => return Ok(false),
        Some(".tables") => {
            println!("Tables:");
            for table in engine.table_names()? {
                println!("  {}", table);
            }
        }
        Some(".schema") => {
            let tables = match parts.get(1) {
                Some(name) => vec![name.to_string()],
                None => engine.table_names()?,
            };
            for name in tables {
                println!("{}", engine.table_info(&name)?);
            }
        }
        Some(".show") => {
            let name = parts.get(1).context("usage: .show <table>")?;
            print!("{}", format_results(&engine.table(name)?));
        }
        Some(".journal") => {
            let n = match parts.get(1) {
                Some(n) => n.parse::<usize>()?,
                None => journal.len(),
            };
            let start = journal.len().saturating_sub(n);
            for (i, entry) in journal.iter().enumerate().skip(start) {
                println!("{:>4}  {}", i + 1, entry);
            }
        }
        Some(other) => bail!("unknown command '{}', type '.help' for available commands", other),
        None => {}
    }
    Ok(true)
}

/// Main REPL loop
fn run_repl(mut engine: ExecutionEngine) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut journal: Vec<String> = Vec::new();

    print_banner(&engine.config().name);

    loop {
        let line = match editor.readline("cairndb> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        editor.add_history_entry(trimmed)?;

        if trimmed.starts_with('.') {
            match handle_special_command(&mut engine, trimmed, &journal) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("Error: {}", e),
            }
        } else if let Err(e) = execute(&mut engine, trimmed) {
            eprintln!("Error: {}", e);
        }
        journal.push(trimmed.to_string());
    }

    println!("Goodbye!");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "default".to_string());
    let config = DatabaseConfig::new(name).with_env_overrides()?;
    let engine = ExecutionEngine::open(config).context("could not open database")?;

    run_repl(engine)
}
