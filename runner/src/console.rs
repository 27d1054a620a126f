//! Line-oriented command console over a launched orchestrator

use anyhow::Result;
use emulation_orchestrator::{EmulationOrchestrator, NodeId, TimeStep};
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const PROMPT: &str = "constellation> ";

const HELP: &str = "\
Commands:
  create_nodes | create_links | run_routing_daemon
  get_distance <node1> <node2> <time>      link distance (km)
  get_neighbors <node> <time>              linked satellites
  get_GSes <node> <time>                   linked ground stations
  get_position <sat> <time>                raw position record
  get_utility <time>                       record a utility check
  set_damage <ratio> <time>                record random link damage
  set_recovery <time>                      record damage recovery
  check_routing_table <sat> <time>         record a routing table dump
  set_next_hop <sat> <dest> <next> <time>  record a static next hop
  set_ping <node1> <node2> <time>          record a ping
  set_perf <node1> <node2> <time>          record a throughput probe
  path                                     print the run directory
  start_emulation | stop_emulation
  exit | quit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Help,
    CreateNodes,
    CreateLinks,
    RunRoutingDaemon,
    Distance(NodeId, NodeId, TimeStep),
    Neighbors(NodeId, TimeStep),
    GroundStations(NodeId, TimeStep),
    Position(NodeId, TimeStep),
    Utility(TimeStep),
    Damage(f64, TimeStep),
    Recovery(TimeStep),
    RouteCheck(NodeId, TimeStep),
    NextHop(NodeId, NodeId, NodeId, TimeStep),
    Ping(NodeId, NodeId, TimeStep),
    Perf(NodeId, NodeId, TimeStep),
    Path,
    StartEmulation,
    StopEmulation,
    Exit,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Pull the next argument, tolerating `1, 2` style separators
fn arg<T: FromStr>(args: &mut std::slice::Iter<'_, &str>, usage: &'static str) -> Result<T, ParseError> {
    args.next()
        .and_then(|a| a.parse().ok())
        .ok_or(ParseError::Usage(usage))
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, ParseError> {
        let words: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|w| !w.is_empty())
            .collect();
        let (name, rest) = words.split_first().ok_or(ParseError::Empty)?;
        let mut args = rest.iter();

        let command = match *name {
            "help" => Command::Help,
            "create_nodes" => Command::CreateNodes,
            "create_links" => Command::CreateLinks,
            "run_routing_daemon" | "run_routing_deamon" => Command::RunRoutingDaemon,
            "get_distance" => {
                let usage = "get_distance <node1> <node2> <time>";
                Command::Distance(arg(&mut args, usage)?, arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "get_neighbors" => {
                let usage = "get_neighbors <node> <time>";
                Command::Neighbors(arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "get_GSes" => {
                let usage = "get_GSes <node> <time>";
                Command::GroundStations(arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "get_position" => {
                let usage = "get_position <sat> <time>";
                Command::Position(arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "get_utility" => Command::Utility(arg(&mut args, "get_utility <time>")?),
            "set_damage" => {
                let usage = "set_damage <ratio> <time>";
                Command::Damage(arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "set_recovery" => Command::Recovery(arg(&mut args, "set_recovery <time>")?),
            "check_routing_table" => {
                let usage = "check_routing_table <sat> <time>";
                Command::RouteCheck(arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "set_next_hop" => {
                let usage = "set_next_hop <sat> <dest> <next> <time>";
                Command::NextHop(
                    arg(&mut args, usage)?,
                    arg(&mut args, usage)?,
                    arg(&mut args, usage)?,
                    arg(&mut args, usage)?,
                )
            }
            "set_ping" => {
                let usage = "set_ping <node1> <node2> <time>";
                Command::Ping(arg(&mut args, usage)?, arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "set_perf" => {
                let usage = "set_perf <node1> <node2> <time>";
                Command::Perf(arg(&mut args, usage)?, arg(&mut args, usage)?, arg(&mut args, usage)?)
            }
            "path" => Command::Path,
            "start_emulation" => Command::StartEmulation,
            "stop_emulation" => Command::StopEmulation,
            "exit" | "quit" => Command::Exit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Run one command, writing its answer to `out`
pub async fn execute(
    sn: &mut EmulationOrchestrator,
    command: Command,
    out: &mut impl Write,
) -> Result<Flow> {
    match command {
        Command::Help => writeln!(out, "{}", HELP)?,
        Command::CreateNodes => sn.create_nodes()?,
        Command::CreateLinks => sn.create_links()?,
        Command::RunRoutingDaemon => sn.run_routing_daemon()?,
        Command::Distance(a, b, t) => {
            let km = sn.topology().distance(a, b, t)?;
            writeln!(out, "The distance between node#{} and node#{} is {:.2}km.", a, b, km)?;
        }
        Command::Neighbors(a, t) => {
            let neighbors = sn.topology().neighbors(a, t)?;
            writeln!(out, "The neighbors are: {:?}.", neighbors)?;
        }
        Command::GroundStations(a, t) => {
            let gses = sn.topology().ground_stations(a, t)?;
            writeln!(out, "The connected GS(es) is(are): {:?}.", gses)?;
        }
        Command::Position(a, t) => {
            let record = sn.topology().position(a, t)?;
            writeln!(out, "The LLA is: {}", record)?;
        }
        Command::Utility(t) => sn.recorder_mut().record_utility_check(t),
        Command::Damage(ratio, t) => sn.recorder_mut().record_damage(ratio, t),
        Command::Recovery(t) => sn.recorder_mut().record_recovery(t),
        Command::RouteCheck(sat, t) => sn.recorder_mut().record_route_check(sat, t),
        Command::NextHop(sat, dest, next, t) => sn.recorder_mut().record_next_hop(sat, dest, next, t),
        Command::Ping(a, b, t) => sn.recorder_mut().record_ping(a, b, t),
        Command::Perf(a, b, t) => sn.recorder_mut().record_perf(a, b, t),
        Command::Path => writeln!(out, "{}", sn.workdir().display())?,
        Command::StartEmulation => sn.start_emulation().await?,
        Command::StopEmulation | Command::Exit => {
            sn.stop_emulation().await?;
            return Ok(Flow::Exit);
        }
    }
    Ok(Flow::Continue)
}

/// Read commands from stdin until `exit`, `stop_emulation` or EOF
pub async fn run(sn: &mut EmulationOrchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    info!("Console ready, type `help` for commands");

    loop {
        write!(stdout, "{}", PROMPT)?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(stdout)?;
            sn.stop_emulation().await?;
            return Ok(());
        };
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                writeln!(stdout, "*** {}", e)?;
                continue;
            }
        };
        match execute(sn, command, &mut stdout).await {
            Ok(Flow::Exit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(e) => writeln!(stdout, "*** {:#}", e)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queries() {
        assert_eq!("get_distance 1 2 5".parse::<Command>(), Ok(Command::Distance(1, 2, 5)));
        assert_eq!("get_neighbors 1, 5".parse::<Command>(), Ok(Command::Neighbors(1, 5)));
        assert_eq!("  get_GSes 3 0 ".parse::<Command>(), Ok(Command::GroundStations(3, 0)));
        assert_eq!("get_position 4 2".parse::<Command>(), Ok(Command::Position(4, 2)));
    }

    #[test]
    fn test_parse_events() {
        assert_eq!("set_damage 0.3 5".parse::<Command>(), Ok(Command::Damage(0.3, 5)));
        assert_eq!(
            "set_next_hop 1 2 3 4".parse::<Command>(),
            Ok(Command::NextHop(1, 2, 3, 4))
        );
        assert_eq!("set_ping 3 7 12".parse::<Command>(), Ok(Command::Ping(3, 7, 12)));
        assert_eq!("set_perf 3 7 12".parse::<Command>(), Ok(Command::Perf(3, 7, 12)));
        assert_eq!("check_routing_table 9 1".parse::<Command>(), Ok(Command::RouteCheck(9, 1)));
        assert_eq!("get_utility 8".parse::<Command>(), Ok(Command::Utility(8)));
        assert_eq!("set_recovery 8".parse::<Command>(), Ok(Command::Recovery(8)));
    }

    #[test]
    fn test_parse_lifecycle() {
        assert_eq!("create_nodes".parse::<Command>(), Ok(Command::CreateNodes));
        assert_eq!("run_routing_daemon".parse::<Command>(), Ok(Command::RunRoutingDaemon));
        assert_eq!("run_routing_deamon".parse::<Command>(), Ok(Command::RunRoutingDaemon));
        assert_eq!("start_emulation".parse::<Command>(), Ok(Command::StartEmulation));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Exit));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Exit));
        assert_eq!("path".parse::<Command>(), Ok(Command::Path));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(ParseError::Empty));
        assert_eq!(
            "warp 9".parse::<Command>(),
            Err(ParseError::Unknown("warp".into()))
        );
        assert_eq!(
            "get_distance 1 2".parse::<Command>(),
            Err(ParseError::Usage("get_distance <node1> <node2> <time>"))
        );
        assert_eq!(
            "set_ping a 2 3".parse::<Command>(),
            Err(ParseError::Usage("set_ping <node1> <node2> <time>"))
        );
        assert!(matches!(
            "get_neighbors -1 0".parse::<Command>(),
            Err(ParseError::Usage(_))
        ));
    }
}
