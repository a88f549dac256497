//! Contract definitions submitted as parallel `name[i]` / `dtype[i]` arrays.

use super::{CompilationError, Contract, FieldDef, compile};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractForm {
    pub fields: Vec<FieldDef>,
}

impl ContractForm {
    /// Pairs `names[i]` with `dtypes[i]`; blank names are dropped.
    pub fn from_pairs<N, D>(names: &[N], dtypes: &[D]) -> Result<Self, CompilationError>
    where
        N: AsRef<str>,
        D: AsRef<str>,
    {
        if names.len() != dtypes.len() {
            return Err(CompilationError::MismatchedForm {
                names: names.len(),
                dtypes: dtypes.len(),
            });
        }
        let fields = names
            .iter()
            .zip(dtypes)
            .filter(|(name, _)| !name.as_ref().trim().is_empty())
            .map(|(name, dtype)| FieldDef::new(name.as_ref().trim(), dtype.as_ref().trim()))
            .collect();
        Ok(Self { fields })
    }

    pub fn compile(&self) -> Result<Contract, CompilationError> {
        compile(&self.fields)
    }
}

/// The project create/update form.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectForm {
    pub name: String,
    pub instructions: String,
    pub request: ContractForm,
    pub response: ContractForm,
    pub model: Option<String>,
    pub collect_payload: Option<bool>,
}

impl ProjectForm {
    /// Builds the form from decoded multi-value form pairs.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, CompilationError> {
        let single = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        let all = |key: &str| {
            pairs
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .collect::<Vec<_>>()
        };

        let name = single("name")
            .filter(|v| !v.trim().is_empty())
            .ok_or(CompilationError::MissingFormField("name"))?;
        let instructions = single("instructions")
            .filter(|v| !v.trim().is_empty())
            .ok_or(CompilationError::MissingFormField("instructions"))?;

        let request = ContractForm::from_pairs(&all("req_name"), &all("req_dtype"))?;
        let response = ContractForm::from_pairs(&all("res_name"), &all("res_dtype"))?;

        let model = single("model").filter(|v| !v.trim().is_empty());
        let collect_payload = single("collect_payload").map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "on" | "true" | "1" | "yes"
            )
        });

        Ok(Self {
            name,
            instructions,
            request,
            response,
            model,
            collect_payload,
        })
    }

    /// Compiles both sides; either both succeed or neither is used.
    pub fn compile_contracts(&self) -> Result<(Contract, Contract), CompilationError> {
        Ok((self.request.compile()?, self.response.compile()?))
    }
}
