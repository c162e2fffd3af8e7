use anyhow::Result;
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lotto_tracker::components::pattern::InputField;
use lotto_tracker::components::{
    DashboardPage, DeleteOutcome, GamesPage, PatternNumberInputs, PatternNumbers,
};
use lotto_tracker::{
    AuthState, Countries, DataClient, Draws, LottoTypes, NewLottoDraw, NewLottoGame, NewLottoType,
    Notifier, RecordingNotifier, Users,
};

fn required_str<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing {} parameter", key))
}

fn optional_str<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}

fn optional_u8(arguments: &HashMap<String, Value>, key: &str) -> Result<Option<u8>> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("{} must be a number from 0 to 255", key)),
    }
}

fn string_list(arguments: &HashMap<String, Value>, key: &str) -> Result<Vec<String>> {
    let values = arguments
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing {} parameter", key))?;
    Ok(values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// Stores and pages backing the admin tools.
pub struct AdminUseCase {
    notifier: Arc<RecordingNotifier>,
    lotto_types: LottoTypes,
    countries: Countries,
    draws: Draws,
    users: Users,
    games: GamesPage,
}

impl AdminUseCase {
    pub fn new(client: Arc<dyn DataClient>, notifier: Arc<RecordingNotifier>) -> Self {
        let shared: Arc<dyn Notifier> = notifier.clone();
        Self {
            lotto_types: LottoTypes::new(Arc::clone(&client), Arc::clone(&shared)),
            countries: Countries::new(Arc::clone(&client), Arc::clone(&shared)),
            draws: Draws::new(Arc::clone(&client), Arc::clone(&shared)),
            users: Users::new(Arc::clone(&client), Arc::clone(&shared)),
            games: GamesPage::new(client, shared),
            notifier,
        }
    }

    fn reply(&self, mut body: Value) -> Result<String> {
        if let Some(object) = body.as_object_mut() {
            object.insert("notifications".to_string(), json!(self.notifier.drain()));
        }
        Ok(body.to_string())
    }

    pub async fn list_lotto_types(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        let success = self.lotto_types.fetch().await;
        self.reply(json!({ "success": success, "lotto_types": self.lotto_types.snapshot() }))
    }

    pub async fn add_lotto_type(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let new_type = NewLottoType {
            name: required_str(arguments, "name")?.to_string(),
            description: optional_str(arguments, "description").map(str::to_string),
        };
        match self.lotto_types.create(&new_type).await {
            Ok(created) => self.reply(json!({ "success": true, "created": created })),
            Err(e) => self.reply(json!({ "success": false, "error": e.to_string() })),
        }
    }

    pub async fn list_countries(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        let success = self.countries.fetch().await;
        self.reply(json!({ "success": success, "countries": self.countries.snapshot() }))
    }

    pub async fn list_games(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        self.games.load().await;
        self.reply(json!({ "success": true, "page": self.games.view() }))
    }

    pub async fn add_game(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let new_game = NewLottoGame {
            name: required_str(arguments, "name")?.to_string(),
            country_id: required_str(arguments, "country_id")?.to_string(),
            lotto_type_id: required_str(arguments, "lotto_type_id")?.to_string(),
            numbers_drawn: optional_u8(arguments, "numbers_drawn")?,
        };

        self.games.open_dialog();
        match self.games.add_game(&new_game).await {
            Ok(game) => self.reply(json!({ "success": true, "game": game })),
            Err(e) => {
                // A tool call has no form to keep open.
                self.games.close_dialog();
                self.reply(json!({ "success": false, "error": e.to_string() }))
            }
        }
    }

    pub async fn update_game(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let id = required_str(arguments, "id")?;
        if self.games.games().find(id).is_none() {
            self.games.load().await;
        }
        let mut game = self
            .games
            .games()
            .find(id)
            .ok_or_else(|| anyhow::anyhow!("Unknown game: {}", id))?;

        if let Some(name) = optional_str(arguments, "name") {
            game.name = name.to_string();
        }
        if let Some(country_id) = optional_str(arguments, "country_id") {
            game.country_id = country_id.to_string();
        }
        if let Some(lotto_type_id) = optional_str(arguments, "lotto_type_id") {
            game.lotto_type_id = lotto_type_id.to_string();
        }
        if let Some(numbers_drawn) = optional_u8(arguments, "numbers_drawn")? {
            game.numbers_drawn = Some(numbers_drawn);
        }

        let success = self.games.update_game(&game).await;
        self.reply(json!({ "success": success, "game": self.games.games().find(id) }))
    }

    pub async fn delete_game(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let id = required_str(arguments, "id")?;
        let outcome = self.games.delete_game(id).await;
        let deleted = outcome == DeleteOutcome::Deleted;
        self.reply(json!({ "success": deleted, "outcome": outcome }))
    }

    pub async fn list_draws(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let success = self.draws.fetch().await;
        let mut snapshot = self.draws.snapshot();
        if let Some(game_id) = optional_str(arguments, "game_id") {
            snapshot.items.retain(|draw| draw.game_id == game_id);
        }
        self.reply(json!({ "success": success, "draws": snapshot }))
    }

    pub async fn add_draw(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let draw_date = NaiveDate::parse_from_str(required_str(arguments, "draw_date")?, "%Y-%m-%d")?;
        let numbers: Vec<u8> = serde_json::from_value(
            arguments
                .get("numbers")
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Missing numbers parameter"))?,
        )?;
        let new_draw = NewLottoDraw {
            game_id: required_str(arguments, "game_id")?.to_string(),
            draw_date,
            numbers,
        };
        match self.draws.create(&new_draw).await {
            Ok(created) => self.reply(json!({ "success": true, "created": created })),
            Err(e) => self.reply(json!({ "success": false, "error": e.to_string() })),
        }
    }

    pub async fn list_users(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        let success = self.users.fetch().await;
        self.reply(json!({ "success": success, "users": self.users.snapshot() }))
    }

    pub async fn update_user(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let id = required_str(arguments, "id")?;
        if self.users.find(id).is_none() {
            self.users.fetch().await;
        }
        let mut user = self
            .users
            .find(id)
            .ok_or_else(|| anyhow::anyhow!("Unknown user: {}", id))?;

        if let Some(email) = optional_str(arguments, "email") {
            user.email = email.to_string();
        }
        if let Some(is_admin) = arguments.get("is_admin").and_then(|v| v.as_bool()) {
            user.is_admin = is_admin;
        }

        let success = self.users.update(&user).await;
        self.reply(json!({ "success": success, "user": self.users.find(id) }))
    }

    pub async fn delete_user(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let id = required_str(arguments, "id")?;
        let success = self.users.delete(id).await;
        self.reply(json!({ "success": success }))
    }
}

/// Read-only pages for the signed-in user.
pub struct DashboardUseCase {
    auth: AuthState,
    page: Mutex<DashboardPage>,
}

impl DashboardUseCase {
    pub fn new(auth: AuthState) -> Self {
        Self {
            auth,
            page: Mutex::new(DashboardPage::new()),
        }
    }

    pub async fn dashboard(&self, _arguments: &HashMap<String, Value>) -> Result<String> {
        let view = {
            let mut page = self
                .page
                .lock()
                .map_err(|_| anyhow::anyhow!("dashboard state poisoned"))?;
            page.view(&self.auth)
        };
        Ok(json!({ "success": true, "view": view }).to_string())
    }

    pub async fn check_pattern(&self, arguments: &HashMap<String, Value>) -> Result<String> {
        let success = string_list(arguments, "success")?;
        let machine = string_list(arguments, "machine")?;

        let fields: Vec<InputField> =
            PatternNumberInputs::new(&success, &machine, |_, _| {}, |_, _| {}).fields();
        let numbers = PatternNumbers { success, machine };
        let complete = numbers.complete();

        Ok(json!({
            "success": true,
            "fields": fields,
            "invalid_slots": numbers.invalid_slots(),
            "complete": complete.is_some(),
            "numbers": complete.map(|(success, machine)| json!({ "success": success, "machine": machine })),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_tracker::LocalStore;

    async fn admin() -> AdminUseCase {
        let local = Arc::new(LocalStore::open_in_memory().unwrap());
        local
            .insert("countries", vec![json!({ "id": "us", "name": "United States" })])
            .await
            .unwrap();
        local
            .insert("lotto_types", vec![json!({ "id": "p6", "name": "Pick 6" })])
            .await
            .unwrap();
        AdminUseCase::new(local, Arc::new(RecordingNotifier::new()))
    }

    fn args(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_add_game_then_block_delete_with_draw() {
        let admin = admin().await;
        let reply: Value = serde_json::from_str(
            &admin
                .add_game(&args(json!({ "name": "Powerball", "country_id": "us", "lotto_type_id": "p6" })))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["success"], true);
        let game_id = reply["game"]["id"].as_str().unwrap().to_string();

        admin
            .add_draw(&args(json!({ "game_id": game_id, "draw_date": "2024-02-01", "numbers": [1, 2, 3] })))
            .await
            .unwrap();

        let reply: Value =
            serde_json::from_str(&admin.delete_game(&args(json!({ "id": game_id }))).await.unwrap()).unwrap();
        assert_eq!(reply["outcome"], "blocked");
        assert_eq!(reply["notifications"][0]["title"], "Cannot Delete Game");
    }

    #[tokio::test]
    async fn test_failed_add_reports_notification() {
        let admin = admin().await;
        let reply: Value = serde_json::from_str(
            &admin
                .add_game(&args(json!({ "name": "Ghost", "country_id": "xx", "lotto_type_id": "p6" })))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["notifications"][0]["severity"], "destructive");
    }

    #[tokio::test]
    async fn test_missing_parameter_is_an_error() {
        let admin = admin().await;
        assert!(admin.add_lotto_type(&HashMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_check_pattern_flags_bad_slots() {
        let use_case = DashboardUseCase::new(AuthState::Absent);
        let reply: Value = serde_json::from_str(
            &use_case
                .check_pattern(&args(json!({ "success": ["5", "0"], "machine": [7] })))
                .await
                .unwrap(),
        )
        .unwrap();
        assert_eq!(reply["complete"], false);
        assert_eq!(reply["invalid_slots"][0][1], 1);
        assert_eq!(reply["fields"][2]["placeholder"], "Machine1");
        assert_eq!(reply["fields"][2]["value"], "7");
    }

    #[tokio::test]
    async fn test_dashboard_redirects_without_session() {
        let use_case = DashboardUseCase::new(AuthState::Absent);
        let reply: Value = serde_json::from_str(&use_case.dashboard(&HashMap::new()).await.unwrap()).unwrap();
        assert_eq!(reply["view"]["view"], "redirect");
        assert_eq!(reply["view"]["to"], "/login");
    }
}
