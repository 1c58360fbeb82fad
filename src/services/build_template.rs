//! Built-in container-file templates
//!
//! Runtime build types (java, python, nodejs) have no container file in the
//! repository; the builder renders one of these with `{{KEY}}` substitution.

use crate::domain::application::{BuildConfig, BuildType, PORT_KEY};

/// A container-file template plus the default values of its placeholders.
#[derive(Debug, Clone, Copy)]
pub struct BuildTemplate {
    pub build_type: BuildType,
    pub dockerfile: &'static str,
    pub defaults: &'static [(&'static str, &'static str)],
}

const JAVA17: BuildTemplate = BuildTemplate {
    build_type: BuildType::Java17,
    dockerfile: "FROM maven:3.9-eclipse-temurin-17 AS build
WORKDIR /src
COPY . .
RUN mvn -B -DskipTests package

FROM eclipse-temurin:17-jre
WORKDIR /app
COPY --from=build /src/target/*.jar app.jar
EXPOSE {{PORT}}
ENTRYPOINT [\"sh\", \"-c\", \"java {{JAVA_OPTS}} -jar /app/app.jar\"]
",
    defaults: &[("JAVA_OPTS", "-Xmx384m")],
};

const JAVA21: BuildTemplate = BuildTemplate {
    build_type: BuildType::Java21,
    dockerfile: "FROM maven:3.9-eclipse-temurin-21 AS build
WORKDIR /src
COPY . .
RUN mvn -B -DskipTests package

FROM eclipse-temurin:21-jre
WORKDIR /app
COPY --from=build /src/target/*.jar app.jar
EXPOSE {{PORT}}
ENTRYPOINT [\"sh\", \"-c\", \"java {{JAVA_OPTS}} -jar /app/app.jar\"]
",
    defaults: &[("JAVA_OPTS", "-Xmx384m")],
};

const PYTHON: BuildTemplate = BuildTemplate {
    build_type: BuildType::Python,
    dockerfile: "FROM python:{{PYTHON_VERSION}}-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
EXPOSE {{PORT}}
CMD [\"sh\", \"-c\", \"{{START_COMMAND}}\"]
",
    defaults: &[
        ("PYTHON_VERSION", "3.12"),
        ("START_COMMAND", "python main.py"),
    ],
};

const NODEJS: BuildTemplate = BuildTemplate {
    build_type: BuildType::Nodejs,
    dockerfile: "FROM node:{{NODE_VERSION}}-alpine
WORKDIR /app
COPY package*.json ./
RUN npm ci --omit=dev
COPY . .
EXPOSE {{PORT}}
CMD [\"sh\", \"-c\", \"{{START_COMMAND}}\"]
",
    defaults: &[("NODE_VERSION", "20"), ("START_COMMAND", "npm start")],
};

/// Template for a runtime build type; `None` for `dockerfile` builds.
pub fn template_for(build_type: BuildType) -> Option<&'static BuildTemplate> {
    match build_type {
        BuildType::Dockerfile => None,
        BuildType::Java17 => Some(&JAVA17),
        BuildType::Java21 => Some(&JAVA21),
        BuildType::Python => Some(&PYTHON),
        BuildType::Nodejs => Some(&NODEJS),
    }
}

/// Replace every `{{KEY}}` occurrence with its value.
pub fn render(template: &str, values: &BuildConfig) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

impl BuildTemplate {
    /// Render with template defaults, overridden by the application's build config.
    /// `PORT` always resolves, to the configured or default container port.
    pub fn render(&self, config: Option<&BuildConfig>) -> String {
        let mut values: BuildConfig = self.defaults.iter().copied().collect();
        if let Some(config) = config {
            for (key, value) in config.iter() {
                values.insert(key, value);
            }
        }
        let port = config.map_or_else(|| BuildConfig::new().port(), BuildConfig::port);
        values.insert(PORT_KEY, port.to_string());

        render(self.dockerfile, &values)
    }
}
