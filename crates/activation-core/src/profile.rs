//! Profile Data
//!
//! Company/user details collected before any plan is activated.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ActivationError, Result, ValidationErrors};

/// Profile submitted once per checkout session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileData {
    pub industry: String,
    pub company_size: String,
    pub country: String,
    pub job_title: String,
    pub website: String,
    pub linkedin_url: String,

    /// How the user heard about us
    #[serde(rename = "how_did_you_hear")]
    pub referral_source: String,

    pub interested_features: String,

    #[serde(default)]
    pub marketing_opt_in: bool,
}

impl ProfileData {
    /// Check every field and report all failures at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();

        check_min_len(&mut errors, "industry", &self.industry, 2, "Industry is required");
        check_min_len(
            &mut errors,
            "company_size",
            &self.company_size,
            1,
            "Company size is required",
        );
        check_min_len(&mut errors, "country", &self.country, 2, "Country is required");
        check_min_len(&mut errors, "job_title", &self.job_title, 2, "Job title is required");
        check_url(&mut errors, "website", &self.website, "Enter a valid website URL");
        check_url(
            &mut errors,
            "linkedin_url",
            &self.linkedin_url,
            "Enter a valid LinkedIn URL",
        );
        check_min_len(
            &mut errors,
            "how_did_you_hear",
            &self.referral_source,
            2,
            "This field is required",
        );
        check_min_len(
            &mut errors,
            "interested_features",
            &self.interested_features,
            2,
            "This field is required",
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ActivationError::Validation(errors))
        }
    }
}

fn check_min_len(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: &str,
    min: usize,
    message: &'static str,
) {
    if value.trim().chars().count() < min {
        errors.push(field, message);
    }
}

fn check_url(errors: &mut ValidationErrors, field: &'static str, value: &str, message: &'static str) {
    if Url::parse(value.trim()).is_err() {
        errors.push(field, message);
    }
}

#[cfg(test)]
pub(crate) fn sample_profile() -> ProfileData {
    ProfileData {
        industry: "Software".into(),
        company_size: "11-50".into(),
        country: "India".into(),
        job_title: "Engineering Manager".into(),
        website: "https://example.com".into(),
        linkedin_url: "https://www.linkedin.com/in/someone".into(),
        referral_source: "Search".into(),
        interested_features: "JD enhancement".into(),
        marketing_opt_in: false,
    }
}
