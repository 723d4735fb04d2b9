use color_eyre::{eyre::eyre, Result};
use nomad::api::types::{City, EntityId, Job, JobCategory, UserPreferences, UserProfile};
use nomad::api::HttpTransport;
use nomad::cache::{MemoryCache, QueryParams};
use nomad::config::Config;
use nomad::data::jobs::JobSearch;
use nomad::data::{Credentials, DataAccess, Registration, Session};
use nomad::debounce::Debouncer;
use nomad::filter::{filter_jobs_by_salary, paginate, EmptyResultPolicy};
use nomad::storage::SqliteStorage;
use nomad::store::Notification;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::commands::{
  AuthCommand, CitiesCommand, CityFilterArgs, Command, JobFilterArgs, JobsCommand, ListArgs,
  LiveSearchArgs, PreferenceArgs, SavedCommand, TokenCommand, UserCommand,
};

/// Command-line front end over the data-access layer
pub struct App {
  config: Config,
  data: DataAccess,
  notifications: mpsc::UnboundedReceiver<Notification>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let path = match &config.storage.path {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    let storage = Arc::new(SqliteStorage::open(&path)?);
    debug!(path = %path.display(), "opened storage");

    let transport = Arc::new(HttpTransport::new(
      &config.api.base_url,
      config.api.timeout(),
    )?);
    let cache = Arc::new(
      MemoryCache::new()
        .with_ttl(config.cache.ttl())
        .with_max_entities(config.cache.max_entities),
    );

    let data = DataAccess::new(transport, storage, cache);
    if let Some(token) = Config::api_token() {
      data.api().set_token(&token)?;
    }
    let notifications = data.store().subscribe();

    Ok(Self {
      config,
      data,
      notifications,
    })
  }

  fn policy(&self) -> EmptyResultPolicy {
    self.config.filter.empty_result_policy
  }

  pub async fn run(&mut self, command: Command) -> Result<()> {
    let result = self.dispatch(command).await;
    self.drain_notifications();
    result
  }

  /// Print queued success and session notices. Errors are reported by the
  /// command's own result.
  fn drain_notifications(&mut self) {
    while let Ok(notification) = self.notifications.try_recv() {
      match notification {
        Notification::Success(message) => eprintln!("{}", message),
        Notification::LoginRequired => {
          eprintln!("Session expired or missing. Log in with `nomad auth login`.")
        }
        Notification::Error(_) => {}
      }
    }
  }

  async fn dispatch(&mut self, command: Command) -> Result<()> {
    match command {
      Command::Cities(cmd) => self.cities(cmd).await,
      Command::Jobs(cmd) => self.jobs(cmd).await,
      Command::User(cmd) => self.user(cmd).await,
      Command::Saved(cmd) => self.saved(cmd),
      Command::Auth(cmd) => self.auth(cmd).await,
      Command::Token(cmd) => self.token(cmd),
      Command::Health => self.health().await,
      Command::Search(args) => self.live_search(args).await,
    }
  }

  async fn cities(&self, command: CitiesCommand) -> Result<()> {
    let cities = &self.data.cities;
    let filter = match command {
      CitiesCommand::List { list, filter } => {
        let params = list.params();
        cities.load_cities(&params, list.refresh).await?;
        self.load_more_cities(&list, &params).await?;
        filter
      }
      CitiesCommand::Show { key, refresh } => {
        let city = match EntityId::from(key.as_str()) {
          id @ EntityId::Int(_) => cities.load_city_by_id(&id, refresh).await?,
          EntityId::Str(slug) => cities.load_city_by_slug(&slug, refresh).await?,
        };
        print_city_detail(&city);
        return Ok(());
      }
      CitiesCommand::Search {
        query,
        list,
        filter,
      } => {
        cities
          .search_cities(&query, &list.params(), list.refresh)
          .await?;
        filter
      }
      CitiesCommand::Filter {
        pairs,
        refresh,
        filter,
      } => {
        let filters: QueryParams = pairs.into_iter().collect();
        cities.set_filters(&filters);
        cities.load_cities_with_filters(&filters, refresh).await?;
        filter
      }
      CitiesCommand::Popular { refresh, filter } => {
        cities.load_popular_cities(refresh).await?;
        filter
      }
      CitiesCommand::Country {
        country,
        refresh,
        filter,
      } => {
        cities.load_cities_by_country(&country, refresh).await?;
        filter
      }
      CitiesCommand::Personalized { list, filter } => {
        let personalized = cities
          .load_personalized_cities(&list.params(), list.refresh)
          .await?;
        if let Some(prefs) = &personalized.user_preferences {
          print_preferences(prefs);
        }
        filter
      }
      CitiesCommand::Saved { refresh } => {
        let saved = cities
          .load_saved_cities(&QueryParams::new(), refresh)
          .await?;
        print_city_names(&saved);
        return Ok(());
      }
      CitiesCommand::Save { id } => {
        cities.toggle_save_city(&EntityId::from(id.as_str())).await?;
        return Ok(());
      }
    };

    let state = self.data.store().cities();
    print_cities(&state.items, &filter, self.policy());
    if let Some(p) = &state.pagination {
      println!(
        "server page {}/{} ({} cities)",
        p.current_page, p.total_pages, p.total_items
      );
    }
    Ok(())
  }

  async fn load_more_cities(&self, list: &ListArgs, params: &QueryParams) -> Result<()> {
    for offset in 1..=list.more {
      let next = list.first_page() + offset;
      if !self.data.cities.load_more_cities(next, params).await? {
        info!(page = next, "no more cities");
        break;
      }
    }
    Ok(())
  }

  async fn jobs(&self, command: JobsCommand) -> Result<()> {
    let jobs = &self.data.jobs;
    let (filter, items) = match command {
      JobsCommand::List { list, filter } => {
        let params = list.params();
        jobs.load_jobs(&params, list.refresh).await?;
        for offset in 1..=list.more {
          let next = list.first_page() + offset;
          if !jobs.load_more_jobs(next, &params).await? {
            info!(page = next, "no more jobs");
            break;
          }
        }
        (filter, self.data.store().jobs().items)
      }
      JobsCommand::Latest { list, filter } => {
        let latest = jobs.load_latest_jobs(&list.params(), list.refresh).await?;
        (filter, latest)
      }
      JobsCommand::Category { slug, list, filter } => {
        let found = jobs
          .load_jobs_by_category(&slug, &list.params(), list.refresh)
          .await?;
        (filter, found)
      }
      JobsCommand::Company { name, list, filter } => {
        let found = jobs
          .load_jobs_by_company(&name, &list.params(), list.refresh)
          .await?;
        (filter, found)
      }
      JobsCommand::Search {
        keywords,
        list,
        filter,
      } => {
        let found = jobs
          .search_jobs(&keywords, &list.params(), list.refresh)
          .await?;
        (filter, found)
      }
      JobsCommand::Advanced {
        keywords,
        category,
        company,
        limit,
        filter,
      } => {
        let criteria = JobSearch {
          keywords,
          category,
          company_name: company,
          limit,
        };
        (filter, jobs.search_jobs_advanced(&criteria).await?)
      }
      JobsCommand::Categories { popular, refresh } => {
        let categories = if popular {
          jobs.load_popular_categories().await?
        } else {
          jobs.load_categories(refresh).await?
        };
        print_categories(&categories, popular);
        return Ok(());
      }
      JobsCommand::Personalized { list, filter } => {
        let personalized = jobs
          .load_personalized_jobs(&list.params(), list.refresh)
          .await?;
        if let Some(prefs) = &personalized.user_preferences {
          print_preferences(prefs);
        }
        (filter, personalized.items)
      }
      JobsCommand::Show { id, refresh } => {
        let job = jobs.load_job_by_id(&EntityId::from(id.as_str()), refresh).await?;
        print_job_detail(&job, self.data.user.local_saved_jobs().contains(&job.id));
        return Ok(());
      }
    };

    print_jobs(&items, &filter);
    Ok(())
  }

  async fn user(&self, command: UserCommand) -> Result<()> {
    let user = &self.data.user;
    match command {
      UserCommand::Profile { refresh } => match user.load_profile(refresh).await? {
        Some(profile) => print_profile(&profile),
        None => eprintln!("Not signed in. Log in with `nomad auth login`."),
      },
      UserCommand::Update { pairs } => {
        let changes: Map<String, Value> = pairs
          .into_iter()
          .map(|(k, v)| (k, Value::String(v)))
          .collect();
        let profile = user.update_profile(&Value::Object(changes)).await?;
        print_profile(&profile);
      }
      UserCommand::Preferences(args) => {
        user.update_preferences(&preferences_from(args)).await?;
      }
      UserCommand::SavedCities { refresh } => {
        print_city_names(&user.load_saved_cities(refresh).await?);
      }
      UserCommand::SavedJobs { refresh } => {
        for saved in user.load_saved_jobs(refresh).await? {
          println!("{:<8} {}", saved.job_id, saved.status);
        }
      }
      UserCommand::SaveJob { id, status } => {
        user
          .save_job(&EntityId::from(id.as_str()), status.as_deref())
          .await?;
      }
      UserCommand::UpdateJob { id, status } => {
        user
          .update_saved_job(&EntityId::from(id.as_str()), &status)
          .await?;
      }
      UserCommand::RemoveJob { id } => {
        user.remove_saved_job(&EntityId::from(id.as_str())).await?;
      }
    }
    Ok(())
  }

  fn saved(&self, command: SavedCommand) -> Result<()> {
    let saved = self.data.user.local_saved_jobs();
    match command {
      SavedCommand::List => {
        for id in saved.list() {
          println!("{}", id);
        }
      }
      SavedCommand::Toggle { id } => {
        let id = EntityId::from(id.as_str());
        if saved.toggle(&id)? {
          println!("Saved job {}", id);
        } else {
          println!("Removed job {}", id);
        }
      }
      SavedCommand::Check { id } => {
        let id = EntityId::from(id.as_str());
        println!("{}", if saved.contains(&id) { "saved" } else { "not saved" });
      }
    }
    Ok(())
  }

  async fn auth(&self, command: AuthCommand) -> Result<()> {
    let auth = &self.data.auth;
    match command {
      AuthCommand::Login { email, password } => {
        let session = auth.login(&Credentials { email, password }).await?;
        print_session(&session);
      }
      AuthCommand::Register {
        email,
        password,
        display_name,
        fields,
      } => {
        let extra: Map<String, Value> = fields
          .into_iter()
          .map(|(k, v)| (k, Value::String(v)))
          .collect();
        let registration = Registration {
          email,
          password,
          display_name,
          extra,
        };
        let session = auth.register(&registration).await?;
        print_session(&session);
      }
      AuthCommand::Logout => auth.logout()?,
    }
    Ok(())
  }

  async fn health(&self) -> Result<()> {
    let status = self.data.auth.check_health().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
  }

  fn token(&self, command: TokenCommand) -> Result<()> {
    match command {
      TokenCommand::Set { token } => {
        let token = token.trim();
        if token.is_empty() {
          return Err(eyre!("Token cannot be empty"));
        }
        self.data.api().set_token(token)?;
        println!("Token stored");
      }
      TokenCommand::Clear => {
        self.data.api().clear_token()?;
        println!("Token cleared");
      }
      TokenCommand::Status => {
        let status = if self.data.api().has_token() {
          "Token stored"
        } else {
          "No token stored"
        };
        println!("{}", status);
      }
    }
    Ok(())
  }

  /// Read queries from stdin and search after each quiet period.
  async fn live_search(&self, args: LiveSearchArgs) -> Result<()> {
    let delay = args
      .debounce_ms
      .map(Duration::from_millis)
      .unwrap_or_else(|| self.config.search.debounce());
    let debouncer = Debouncer::new(delay);
    let running = Arc::new(AtomicUsize::new(0));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
      let query = line.trim().to_string();
      if query.is_empty() {
        continue;
      }

      let cities = self.data.cities.clone();
      let filter = args.filter.clone();
      let policy = self.policy();
      let running = Arc::clone(&running);
      debouncer.call(move || {
        running.fetch_add(1, Ordering::SeqCst);
        async move {
          match cities.search_cities(&query, &QueryParams::new(), false).await {
            Ok(found) => {
              println!("> {}", query);
              print_cities(&found, &filter, policy);
            }
            Err(e) => eprintln!("Search for '{}' failed: {}", query, e),
          }
          running.fetch_sub(1, Ordering::SeqCst);
        }
      });
    }

    // Input closed; let the last search finish
    while debouncer.is_pending() || running.load(Ordering::SeqCst) > 0 {
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
  }
}

fn preferences_from(args: PreferenceArgs) -> UserPreferences {
  UserPreferences {
    preferred_climate: args.climate,
    monthly_budget_min_usd: args.budget_min,
    monthly_budget_max_usd: args.budget_max,
    internet_speed_requirement: args.internet,
    lifestyle_priorities: args.priorities,
    preferred_regions: None,
    work_style: args.work_style,
  }
}

fn fmt_num(value: Option<f64>) -> String {
  value.map(|v| format!("{:.0}", v)).unwrap_or_else(|| "-".to_string())
}

fn print_cities(cities: &[City], args: &CityFilterArgs, policy: EmptyResultPolicy) {
  let view = args.to_filter(policy).apply(cities);
  if view.is_empty() {
    println!("No cities match your filters.");
    return;
  }

  let page = paginate(&view, args.view.view_page, args.view.page_size);
  println!(
    "{:<6} {:<24} {:<16} {:<8} {:>7} {:>9} {:>7} {:>6}",
    "ID", "NAME", "COUNTRY", "CLIMATE", "COST", "INTERNET", "SAFETY", "SCORE"
  );
  for city in page.items {
    println!(
      "{:<6} {:<24} {:<16} {:<8} {:>7} {:>9} {:>7} {:>6}",
      city.id,
      city.name,
      city.country,
      city.climate.as_deref().unwrap_or("-"),
      fmt_num(city.cost),
      fmt_num(city.internet),
      fmt_num(city.safety),
      fmt_num(city.effective_score()),
    );
  }
  print_view_footer(&page_label(page.page, page.total_pages), view.len(), cities.len());
}

fn page_label(page: usize, total: usize) -> String {
  format!("page {}/{}", page, total)
}

fn print_view_footer(label: &str, shown: usize, loaded: usize) {
  println!("{} ({} matching of {} loaded)", label, shown, loaded);
}

fn print_city_names(cities: &[City]) {
  if cities.is_empty() {
    println!("No saved cities.");
  }
  for city in cities {
    println!("{:<6} {}, {}", city.id, city.name, city.country);
  }
}

fn print_city_detail(city: &City) {
  println!("{} ({})", city.name, city.country);
  if let Some(slug) = &city.slug {
    println!("  slug:     {}", slug);
  }
  println!("  climate:  {}", city.climate.as_deref().unwrap_or("-"));
  println!("  cost:     {} USD/month", fmt_num(city.cost));
  println!("  internet: {} Mbps", fmt_num(city.internet));
  println!("  safety:   {}", fmt_num(city.safety));
  println!("  score:    {}", fmt_num(city.effective_score()));
  let tags = city.tags();
  if !tags.is_empty() {
    println!("  tags:     {}", tags.join(", "));
  }
}

fn print_jobs(jobs: &[Job], args: &JobFilterArgs) {
  let salaried: Vec<Job>;
  let source = if args.filters_salary() {
    salaried = filter_jobs_by_salary(jobs, args.min_salary, args.max_salary)
      .into_iter()
      .cloned()
      .collect();
    &salaried[..]
  } else {
    jobs
  };

  let view = args.to_filter().apply(source);
  if view.is_empty() {
    println!("No jobs match your filters.");
    return;
  }

  let page = paginate(&view, args.view.view_page, args.view.page_size);
  let now = chrono::Utc::now();
  println!(
    "{:<8} {:<36} {:<22} {:<20} {}",
    "ID", "TITLE", "COMPANY", "SALARY", "NEW"
  );
  for job in page.items {
    println!(
      "{:<8} {:<36} {:<22} {:<20} {}",
      job.id,
      job.title,
      job.company_name,
      job.salary.as_deref().unwrap_or("-"),
      if job.is_recent(now) { "*" } else { "" },
    );
  }
  print_view_footer(&page_label(page.page, page.total_pages), view.len(), jobs.len());
}

fn print_job_detail(job: &Job, bookmarked: bool) {
  println!("{} at {}", job.title, job.company_name);
  println!("  category: {}", job.category.as_deref().unwrap_or("-"));
  println!("  type:     {}", job.job_type.as_deref().unwrap_or("-"));
  println!(
    "  location: {}",
    job.candidate_required_location.as_deref().unwrap_or("-")
  );
  match (job.salary_min(), job.salary_max()) {
    (Some(min), Some(max)) => println!("  salary:   {} - {}", min, max),
    (Some(min), None) => println!("  salary:   {}", min),
    _ => println!("  salary:   {}", job.salary.as_deref().unwrap_or("-")),
  }
  if let Some(published) = &job.publication_date {
    println!("  posted:   {}", published);
  }
  if let Some(url) = &job.url {
    println!("  apply:    {}", url);
  }
  if bookmarked {
    println!("  (bookmarked on this device)");
  }
}

fn print_categories(categories: &[JobCategory], with_counts: bool) {
  for category in categories {
    if with_counts {
      println!("{:<30} {:>6}", category.name, category.job_count);
    } else {
      println!("{:<30} {}", category.name, category.path_slug());
    }
  }
}

fn print_preferences(prefs: &UserPreferences) {
  println!(
    "Matching on climate={} budget={}-{} internet={}",
    prefs.preferred_climate.as_deref().unwrap_or("any"),
    fmt_num(prefs.monthly_budget_min_usd),
    fmt_num(prefs.monthly_budget_max_usd),
    prefs.internet_speed_requirement.as_deref().unwrap_or("any"),
  );
}

fn print_session(session: &Session) {
  match &session.user {
    Some(user) => print_profile(user),
    None => println!("Session stored"),
  }
}

fn print_profile(profile: &UserProfile) {
  println!(
    "{} <{}>",
    profile.display_name.as_deref().unwrap_or("(no name)"),
    profile.email.as_deref().unwrap_or("-")
  );
  if let Some(title) = &profile.job_title {
    println!("  job title: {}", title);
  }
  if let Some(since) = &profile.created_at {
    println!("  member since: {}", since);
  }
  print_preferences(&profile.preferences());
}
