//! Command-line commands and their arguments.

use clap::{Args, Subcommand};
use nomad::cache::QueryParams;
use nomad::filter::{CityFilter, EmptyResultPolicy, JobFilter, SortKey};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Browse cities
  #[command(subcommand, visible_alias = "c")]
  Cities(CitiesCommand),

  /// Browse jobs
  #[command(subcommand, visible_alias = "j")]
  Jobs(JobsCommand),

  /// Profile, preferences and server-side saved items
  #[command(subcommand, visible_alias = "u")]
  User(UserCommand),

  /// Jobs bookmarked on this device
  #[command(subcommand)]
  Saved(SavedCommand),

  /// Log in, register or log out
  #[command(subcommand)]
  Auth(AuthCommand),

  /// Manage the stored API token
  #[command(subcommand)]
  Token(TokenCommand),

  /// Check that the backend is reachable
  Health,

  /// Search cities as you type: one query per stdin line, debounced
  Search(LiveSearchArgs),
}

/// Server-side paging and cache control.
#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
  /// Page to request
  #[arg(long)]
  pub page: Option<u64>,

  /// Items per page
  #[arg(long)]
  pub limit: Option<u64>,

  /// Bypass the cache
  #[arg(long)]
  pub refresh: bool,

  /// Append this many further pages after the first
  #[arg(long, default_value_t = 0)]
  pub more: u64,
}

impl ListArgs {
  pub fn params(&self) -> QueryParams {
    QueryParams::new()
      .with("page", self.page)
      .with("limit", self.limit)
  }

  pub fn first_page(&self) -> u64 {
    self.page.unwrap_or(1)
  }
}

/// Local view over loaded items.
#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
  /// Page of the filtered view to print
  #[arg(long, default_value_t = 1)]
  pub view_page: usize,

  /// Rows per printed page
  #[arg(long, default_value_t = 20)]
  pub page_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CityFilterArgs {
  /// Substring of city name or country
  #[arg(long, default_value = "")]
  pub filter: String,

  /// Climate to keep, or "any"
  #[arg(long)]
  pub climate: Option<String>,

  /// Maximum monthly cost in USD
  #[arg(long)]
  pub max_cost: Option<f64>,

  /// One of score-desc, cost-asc, internet-desc, safety-desc
  #[arg(long, default_value_t = SortKey::ScoreDesc)]
  pub sort: SortKey,

  #[command(flatten)]
  pub view: ViewArgs,
}

impl CityFilterArgs {
  pub fn to_filter(&self, policy: EmptyResultPolicy) -> CityFilter {
    CityFilter {
      search: self.filter.clone(),
      climate: self.climate.clone(),
      max_cost: self.max_cost,
      sort: self.sort,
      empty_result_policy: policy,
    }
  }
}

#[derive(Args, Debug, Clone)]
pub struct JobFilterArgs {
  /// Substring of title, company or category
  #[arg(long, default_value = "")]
  pub filter: String,

  #[arg(long)]
  pub job_type: Option<String>,

  /// Keep jobs whose minimum salary is at least this
  #[arg(long)]
  pub min_salary: Option<u64>,

  /// Keep jobs whose minimum salary is at most this
  #[arg(long)]
  pub max_salary: Option<u64>,

  #[command(flatten)]
  pub view: ViewArgs,
}

impl JobFilterArgs {
  pub fn to_filter(&self) -> JobFilter {
    JobFilter {
      search: self.filter.clone(),
      category: None,
      job_type: self.job_type.clone(),
    }
  }

  pub fn filters_salary(&self) -> bool {
    self.min_salary.is_some() || self.max_salary.is_some()
  }
}

#[derive(Subcommand, Debug)]
pub enum CitiesCommand {
  /// List cities
  List {
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Show one city by slug or numeric id
  Show {
    key: String,
    #[arg(long)]
    refresh: bool,
  },

  /// Search cities on the server
  Search {
    query: String,
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Server-side filtering with key=value pairs
  Filter {
    #[arg(value_parser = parse_key_value)]
    pairs: Vec<(String, String)>,
    #[arg(long)]
    refresh: bool,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Most popular cities
  Popular {
    #[arg(long)]
    refresh: bool,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Cities in one country
  Country {
    country: String,
    #[arg(long)]
    refresh: bool,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Cities ranked for the signed-in user
  Personalized {
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: CityFilterArgs,
  },

  /// Cities the signed-in user saved
  Saved {
    #[arg(long)]
    refresh: bool,
  },

  /// Save or unsave a city
  Save { id: String },
}

#[derive(Subcommand, Debug)]
pub enum JobsCommand {
  /// List jobs
  List {
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Most recently published jobs
  Latest {
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Jobs in a category (e.g. software-dev, design, marketing)
  Category {
    slug: String,
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Jobs at one company
  Company {
    name: String,
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Keyword search
  Search {
    keywords: String,
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Keyword search when keywords are given, filtered list otherwise
  Advanced {
    #[arg(long)]
    keywords: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    company: Option<String>,
    #[arg(long)]
    limit: Option<u64>,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Job categories
  Categories {
    /// Rank the first categories by open jobs
    #[arg(long)]
    popular: bool,
    #[arg(long)]
    refresh: bool,
  },

  /// Jobs ranked for the signed-in user
  Personalized {
    #[command(flatten)]
    list: ListArgs,
    #[command(flatten)]
    filter: JobFilterArgs,
  },

  /// Show one job
  Show {
    id: String,
    #[arg(long)]
    refresh: bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
  /// Show the profile
  Profile {
    #[arg(long)]
    refresh: bool,
  },

  /// Update profile fields with key=value pairs
  Update {
    #[arg(required = true, value_parser = parse_key_value)]
    pairs: Vec<(String, String)>,
  },

  /// Update matching preferences
  Preferences(PreferenceArgs),

  /// Cities saved on the server
  SavedCities {
    #[arg(long)]
    refresh: bool,
  },

  /// Jobs saved on the server
  SavedJobs {
    #[arg(long)]
    refresh: bool,
  },

  /// Save a job on the server
  SaveJob {
    id: String,
    /// Application status (default: Interested)
    #[arg(long)]
    status: Option<String>,
  },

  /// Change a saved job's status
  UpdateJob { id: String, status: String },

  /// Remove a saved job
  RemoveJob { id: String },
}

#[derive(Args, Debug, Clone)]
pub struct PreferenceArgs {
  #[arg(long)]
  pub climate: Option<String>,
  #[arg(long)]
  pub budget_min: Option<f64>,
  #[arg(long)]
  pub budget_max: Option<f64>,
  #[arg(long)]
  pub internet: Option<String>,
  #[arg(long)]
  pub work_style: Option<String>,
  /// Lifestyle priority; repeat for several
  #[arg(long = "priority")]
  pub priorities: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum SavedCommand {
  /// List bookmarked job ids
  List,
  /// Bookmark a job, or remove the bookmark
  Toggle { id: String },
  /// Whether a job is bookmarked
  Check { id: String },
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
  /// Log in and store the session token
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  /// Create an account and store the session token
  Register {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    display_name: Option<String>,
    /// Further profile fields, e.g. `--field climate=Warm`
    #[arg(long = "field", value_parser = parse_key_value)]
    fields: Vec<(String, String)>,
  },
  /// Forget the session token and cached data
  Logout,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
  /// Store a bearer token
  Set { token: String },
  /// Forget the stored token
  Clear,
  /// Whether a token is stored
  Status,
}

#[derive(Args, Debug, Clone)]
pub struct LiveSearchArgs {
  /// Quiet period in milliseconds (default from config)
  #[arg(long)]
  pub debounce_ms: Option<u64>,

  #[command(flatten)]
  pub filter: CityFilterArgs,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => {
      Ok((key.trim().to_string(), value.trim().to_string()))
    }
    _ => Err(format!("expected key=value, got '{}'", raw)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  #[test]
  fn test_parse_key_value() {
    assert_eq!(
      parse_key_value("climate = warm"),
      Ok(("climate".to_string(), "warm".to_string()))
    );
    assert!(parse_key_value("warm").is_err());
    assert!(parse_key_value("=warm").is_err());
  }

  #[test]
  fn test_city_list_args() {
    let cli = Cli::parse_from([
      "nomad", "cities", "list", "--limit", "25", "--sort", "cost-asc", "--climate", "warm",
    ]);
    let Command::Cities(CitiesCommand::List { list, filter }) = cli.command else {
      panic!("expected cities list");
    };
    assert_eq!(list.params(), QueryParams::new().with("limit", 25));
    let filter = filter.to_filter(EmptyResultPolicy::ShowEmpty);
    assert_eq!(filter.sort, SortKey::CostAsc);
    assert_eq!(filter.climate.as_deref(), Some("warm"));
  }

  #[test]
  fn test_alias_and_unknown_sort() {
    assert!(Cli::try_parse_from(["nomad", "c", "popular"]).is_ok());
    assert!(Cli::try_parse_from(["nomad", "cities", "list", "--sort", "price"]).is_err());
  }
}
