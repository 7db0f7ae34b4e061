//! The decrypted vault document.
//!
//! Projects own environments, environments own variables. The document is
//! only ever persisted as a whole, encrypted under the data key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

use envsync_common::{Error, Result, SecretString};
use envsync_crypto::{decrypt_with_aad, encrypt_with_aad, DataKey};

/// A project grouping environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of an environment, used for ordering and defaults.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvironmentType {
    Development,
    Staging,
    Production,
    Custom(String),
}

impl EnvironmentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Custom(s) => s,
        }
    }

    /// Parse a type name. Unknown names become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "staging" => Self::Staging,
            "production" | "prod" => Self::Production,
            other => Self::Custom(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Development => 0,
            Self::Staging => 1,
            Self::Production => 2,
            Self::Custom(_) => 3,
        }
    }
}

impl From<String> for EnvironmentType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<EnvironmentType> for String {
    fn from(t: EnvironmentType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment environment of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub env_type: EnvironmentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An environment variable. The value is zeroized on drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: Uuid,
    pub environment_id: Uuid,
    pub key: String,
    pub value: SecretString,
    pub is_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A search result with its owning project and environment.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub project: Project,
    pub environment: Environment,
    pub variable: Variable,
}

/// Check that a variable key can be written as `KEY=VALUE`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Variable key cannot be empty".to_string()));
    }
    if key.contains('=') || key.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(format!(
            "Variable key '{}' cannot contain '=' or whitespace",
            key
        )));
    }
    Ok(())
}

fn validate_name(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{} name cannot be empty", kind)));
    }
    Ok(name.to_string())
}

fn env_order(a: &Environment, b: &Environment) -> Ordering {
    a.env_type
        .rank()
        .cmp(&b.env_type.rank())
        .then_with(|| a.name.cmp(&b.name))
}

/// Decrypted vault contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultDocument {
    #[serde(default)]
    projects: Vec<Project>,
    #[serde(default)]
    environments: Vec<Environment>,
    #[serde(default)]
    variables: Vec<Variable>,
}

impl VaultDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt the document under `key`, bound to `vault_id`.
    pub fn seal(&self, key: &DataKey, vault_id: &Uuid) -> Result<Vec<u8>> {
        let mut plain = serde_json::to_vec(self)?;
        let sealed = encrypt_with_aad(key.as_bytes(), &plain, vault_id.as_bytes());
        plain.zeroize();
        sealed
    }

    /// Decrypt a document produced by [`VaultDocument::seal`].
    ///
    /// # Errors
    /// - `Error::Crypto` if the data was tampered with or belongs to
    ///   another vault
    pub fn open(sealed: &[u8], key: &DataKey, vault_id: &Uuid) -> Result<Self> {
        let mut plain = decrypt_with_aad(key.as_bytes(), sealed, vault_id.as_bytes())?;
        let document = serde_json::from_slice(&plain);
        plain.zeroize();
        Ok(document?)
    }

    // ========== Projects ==========

    /// Create a project with the default Development, Staging and
    /// Production environments.
    ///
    /// # Errors
    /// - Empty name
    /// - A project with the same name (case-insensitive) exists
    pub fn create_project(&mut self, name: &str, description: Option<&str>) -> Result<Project> {
        let name = validate_name("Project", name)?;
        self.ensure_project_name_free(&name, None)?;

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name,
            description: description.map(String::from),
            created_at: now,
            updated_at: now,
        };
        self.projects.push(project.clone());

        for (env_name, env_type) in [
            ("Development", EnvironmentType::Development),
            ("Staging", EnvironmentType::Staging),
            ("Production", EnvironmentType::Production),
        ] {
            self.push_environment(project.id, env_name.to_string(), env_type);
        }

        Ok(project)
    }

    /// All projects, ordered by name.
    pub fn projects(&self) -> Vec<Project> {
        let mut projects = self.projects.clone();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }

    /// Look up a project by id.
    pub fn project(&self, id: &Uuid) -> Result<&Project> {
        self.projects
            .iter()
            .find(|p| &p.id == id)
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", id)))
    }

    /// Look up a project by id or case-insensitive name.
    pub fn find_project(&self, id_or_name: &str) -> Result<&Project> {
        let needle = id_or_name.trim();
        self.projects
            .iter()
            .find(|p| p.id.to_string() == needle || p.name.eq_ignore_ascii_case(needle))
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", needle)))
    }

    /// Rename a project and replace its description.
    pub fn update_project(
        &mut self,
        id: &Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let name = validate_name("Project", name)?;
        self.ensure_project_name_free(&name, Some(id))?;

        let project = self
            .projects
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", id)))?;

        project.name = name;
        project.description = description.map(String::from);
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    /// Delete a project together with its environments and variables.
    pub fn delete_project(&mut self, id: &Uuid) -> Result<Project> {
        let index = self
            .projects
            .iter()
            .position(|p| &p.id == id)
            .ok_or_else(|| Error::NotFound(format!("Project not found: {}", id)))?;
        let project = self.projects.remove(index);

        let env_ids: Vec<Uuid> = self
            .environments
            .iter()
            .filter(|e| &e.project_id == id)
            .map(|e| e.id)
            .collect();
        self.environments.retain(|e| &e.project_id != id);
        self.variables.retain(|v| !env_ids.contains(&v.environment_id));

        Ok(project)
    }

    fn ensure_project_name_free(&self, name: &str, except: Option<&Uuid>) -> Result<()> {
        let taken = self
            .projects
            .iter()
            .any(|p| Some(&p.id) != except && p.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(Error::AlreadyExists(format!("Project '{}' already exists", name)));
        }
        Ok(())
    }

    // ========== Environments ==========

    fn push_environment(
        &mut self,
        project_id: Uuid,
        name: String,
        env_type: EnvironmentType,
    ) -> Environment {
        let now = Utc::now();
        let environment = Environment {
            id: Uuid::new_v4(),
            project_id,
            name,
            env_type,
            created_at: now,
            updated_at: now,
        };
        self.environments.push(environment.clone());
        environment
    }

    /// Add an environment to a project.
    ///
    /// # Errors
    /// - Project not found
    /// - An environment with the same name exists in the project
    pub fn create_environment(
        &mut self,
        project_id: &Uuid,
        name: &str,
        env_type: EnvironmentType,
    ) -> Result<Environment> {
        self.project(project_id)?;
        let name = validate_name("Environment", name)?;

        let taken = self
            .environments
            .iter()
            .any(|e| &e.project_id == project_id && e.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(Error::AlreadyExists(format!(
                "Environment '{}' already exists",
                name
            )));
        }

        Ok(self.push_environment(*project_id, name, env_type))
    }

    /// Environments of a project: development, staging, production, then
    /// custom ones, ties broken by name.
    pub fn environments(&self, project_id: &Uuid) -> Result<Vec<Environment>> {
        self.project(project_id)?;

        let mut environments: Vec<Environment> = self
            .environments
            .iter()
            .filter(|e| &e.project_id == project_id)
            .cloned()
            .collect();
        environments.sort_by(env_order);
        Ok(environments)
    }

    /// Look up an environment by id.
    pub fn environment(&self, id: &Uuid) -> Result<&Environment> {
        self.environments
            .iter()
            .find(|e| &e.id == id)
            .ok_or_else(|| Error::NotFound(format!("Environment not found: {}", id)))
    }

    /// Look up an environment by project and environment, each given by id
    /// or case-insensitive name.
    pub fn find_environment(&self, project: &str, environment: &str) -> Result<&Environment> {
        let project = self.find_project(project)?;
        let needle = environment.trim();

        self.environments
            .iter()
            .filter(|e| e.project_id == project.id)
            .find(|e| e.id.to_string() == needle || e.name.eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Environment not found: {}/{}",
                    project.name, needle
                ))
            })
    }

    /// Delete an environment and its variables.
    pub fn delete_environment(&mut self, id: &Uuid) -> Result<Environment> {
        let index = self
            .environments
            .iter()
            .position(|e| &e.id == id)
            .ok_or_else(|| Error::NotFound(format!("Environment not found: {}", id)))?;
        let environment = self.environments.remove(index);
        self.variables.retain(|v| &v.environment_id != id);
        Ok(environment)
    }

    // ========== Variables ==========

    fn ensure_key_free(&self, environment_id: &Uuid, key: &str, except: Option<&Uuid>) -> Result<()> {
        let taken = self.variables.iter().any(|v| {
            &v.environment_id == environment_id && v.key == key && Some(&v.id) != except
        });
        if taken {
            return Err(Error::AlreadyExists(format!("Variable '{}' already exists", key)));
        }
        Ok(())
    }

    /// Create a variable.
    ///
    /// # Errors
    /// - Environment not found
    /// - Invalid key
    /// - Key already present in the environment
    pub fn create_variable(
        &mut self,
        environment_id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        self.environment(environment_id)?;
        let key = key.trim();
        validate_key(key)?;
        self.ensure_key_free(environment_id, key, None)?;

        let now = Utc::now();
        let variable = Variable {
            id: Uuid::new_v4(),
            environment_id: *environment_id,
            key: key.to_string(),
            value,
            is_secret,
            created_at: now,
            updated_at: now,
        };
        self.variables.push(variable.clone());
        Ok(variable)
    }

    /// Create the variable, or overwrite the value of an existing one with
    /// the same key.
    pub fn set_variable(
        &mut self,
        environment_id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        let key = key.trim();
        let existing = self
            .variables
            .iter()
            .find(|v| &v.environment_id == environment_id && v.key == key)
            .map(|v| v.id);

        match existing {
            Some(id) => self.update_variable(&id, key, value, is_secret),
            None => self.create_variable(environment_id, key, value, is_secret),
        }
    }

    /// Variables of an environment, ordered by key.
    pub fn variables(&self, environment_id: &Uuid) -> Result<Vec<Variable>> {
        self.environment(environment_id)?;

        let mut variables: Vec<Variable> = self
            .variables
            .iter()
            .filter(|v| &v.environment_id == environment_id)
            .cloned()
            .collect();
        variables.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(variables)
    }

    /// Look up a variable by id.
    pub fn variable(&self, id: &Uuid) -> Result<&Variable> {
        self.variables
            .iter()
            .find(|v| &v.id == id)
            .ok_or_else(|| Error::NotFound(format!("Variable not found: {}", id)))
    }

    /// Look up a variable by key within an environment.
    pub fn variable_by_key(&self, environment_id: &Uuid, key: &str) -> Result<&Variable> {
        self.variables
            .iter()
            .find(|v| &v.environment_id == environment_id && v.key == key)
            .ok_or_else(|| Error::NotFound(format!("Variable not found: {}", key)))
    }

    /// Replace a variable's key, value and secrecy flag.
    pub fn update_variable(
        &mut self,
        id: &Uuid,
        key: &str,
        value: SecretString,
        is_secret: bool,
    ) -> Result<Variable> {
        let key = key.trim();
        validate_key(key)?;
        let environment_id = self.variable(id)?.environment_id;
        self.ensure_key_free(&environment_id, key, Some(id))?;

        let variable = self
            .variables
            .iter_mut()
            .find(|v| &v.id == id)
            .ok_or_else(|| Error::NotFound(format!("Variable not found: {}", id)))?;

        variable.key = key.to_string();
        variable.value = value;
        variable.is_secret = is_secret;
        variable.updated_at = Utc::now();
        Ok(variable.clone())
    }

    /// Delete a variable.
    pub fn delete_variable(&mut self, id: &Uuid) -> Result<Variable> {
        let index = self
            .variables
            .iter()
            .position(|v| &v.id == id)
            .ok_or_else(|| Error::NotFound(format!("Variable not found: {}", id)))?;
        Ok(self.variables.remove(index))
    }

    // ========== Search ==========

    /// Variables whose key contains `query`, ignoring ASCII case, ordered
    /// by project name, environment name and key.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let needle = query.trim().to_ascii_lowercase();

        let mut hits: Vec<SearchHit> = self
            .variables
            .iter()
            .filter(|v| v.key.to_ascii_lowercase().contains(&needle))
            .filter_map(|v| {
                let environment = self.environment(&v.environment_id).ok()?;
                let project = self.project(&environment.project_id).ok()?;
                Some(SearchHit {
                    project: project.clone(),
                    environment: environment.clone(),
                    variable: v.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.project
                .name
                .cmp(&b.project.name)
                .then_with(|| a.environment.name.cmp(&b.environment.name))
                .then_with(|| a.variable.key.cmp(&b.variable.key))
        });
        hits
    }

    /// Number of variables across all environments.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }
}
