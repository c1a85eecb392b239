//! Build descriptor (Dockerfile) generation

use tracing::{info, warn};

use crate::errors::AppError;
use crate::filesys::dir::Dir;
use crate::models::framework::Framework;

pub const DESCRIPTOR_NAME: &str = "Dockerfile";

const PORT_PLACEHOLDER: &str = "@PORT@";

/// Where the descriptor used for a build came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSource {
    /// Already present in the tree; left untouched
    UserProvided,
    /// Written from the template for the framework
    Generated(Framework),
    /// No template fits; an inert placeholder was written
    Fallback,
}

impl DescriptorSource {
    /// Line recorded in the deployment log
    pub fn describe(&self) -> String {
        match self {
            DescriptorSource::UserProvided => "Using Dockerfile from repository".to_string(),
            DescriptorSource::Generated(framework) => format!("Created Dockerfile for {}", framework),
            DescriptorSource::Fallback => {
                "WARNING: framework not recognized, using generic placeholder image".to_string()
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DescriptorSource::Fallback)
    }
}

/// Make sure `root` holds a build descriptor, writing one when it does not
///
/// Generated descriptors serve the application on `app_port`.
pub async fn ensure_descriptor(
    root: &Dir,
    framework: Framework,
    app_port: u16,
) -> Result<DescriptorSource, AppError> {
    let file = root.file(DESCRIPTOR_NAME);
    if file.exists().await {
        info!("Keeping existing {} in {}", DESCRIPTOR_NAME, root.path().display());
        return Ok(DescriptorSource::UserProvided);
    }

    let (source, contents) = match template_for(framework) {
        Some(template) => (DescriptorSource::Generated(framework), template),
        None => {
            warn!("No build template for framework {}, using fallback", framework);
            (DescriptorSource::Fallback, FALLBACK)
        }
    };
    file.write_string(&render(contents, app_port)).await?;
    Ok(source)
}

/// Template text with the port placeholder filled in
pub fn render(template: &str, app_port: u16) -> String {
    template
        .trim_start()
        .replace(PORT_PLACEHOLDER, &app_port.to_string())
}

/// Template for a framework family; `None` when only the fallback applies
pub fn template_for(framework: Framework) -> Option<&'static str> {
    let template = match framework {
        Framework::PythonDjango => DJANGO,
        Framework::PythonFlask => FLASK,
        f if f.is_node() => NODE,
        Framework::JavaMaven => MAVEN,
        Framework::JavaGradle => GRADLE,
        Framework::Php => PHP,
        Framework::Lamp => LAMP,
        Framework::Static => STATIC,
        _ => return None,
    };
    Some(template)
}

const DJANGO: &str = r#"
FROM python:3.10-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt gunicorn
COPY . .
RUN python manage.py collectstatic --noinput || true
EXPOSE @PORT@
CMD ["sh", "-c", "gunicorn --bind 0.0.0.0:@PORT@ $(basename $(dirname $(find . -maxdepth 2 -name wsgi.py | head -n 1))).wsgi:application"]
"#;

const FLASK: &str = r#"
FROM python:3.10-slim
WORKDIR /app
COPY requirements.txt* Pipfile* ./
RUN if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi && pip install --no-cache-dir gunicorn
COPY . .
ENV FLASK_APP=app.py
ENV FLASK_ENV=production
EXPOSE @PORT@
CMD ["gunicorn", "--bind", "0.0.0.0:@PORT@", "app:app"]
"#;

const NODE: &str = r#"
FROM node:18-alpine
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
RUN npm run build --if-present
ENV PORT=@PORT@
EXPOSE @PORT@
CMD ["npm", "start"]
"#;

const MAVEN: &str = r#"
FROM maven:3.9-eclipse-temurin-17 AS build
WORKDIR /app
COPY . .
RUN mvn clean package -DskipTests

FROM eclipse-temurin:17-jre
WORKDIR /app
COPY --from=build /app/target/*.jar app.jar
EXPOSE @PORT@
CMD ["java", "-Dserver.port=@PORT@", "-jar", "app.jar"]
"#;

const GRADLE: &str = r#"
FROM gradle:8-jdk17 AS build
WORKDIR /app
COPY . .
RUN gradle build -x test --no-daemon

FROM eclipse-temurin:17-jre
WORKDIR /app
COPY --from=build /app/build/libs/*.jar app.jar
EXPOSE @PORT@
CMD ["java", "-Dserver.port=@PORT@", "-jar", "app.jar"]
"#;

const PHP: &str = r#"
FROM php:8.2-cli
WORKDIR /app
COPY . .
RUN if [ -f composer.json ]; then curl -sS https://getcomposer.org/installer | php -- --install-dir=/usr/local/bin --filename=composer && composer install --no-dev --no-interaction; fi
EXPOSE @PORT@
CMD ["php", "-S", "0.0.0.0:@PORT@", "-t", "."]
"#;

const LAMP: &str = r#"
FROM php:8.2-apache
RUN a2enmod rewrite \
    && sed -i 's/Listen 80$/Listen @PORT@/' /etc/apache2/ports.conf \
    && sed -i 's/<VirtualHost \*:80>/<VirtualHost *:@PORT@>/' /etc/apache2/sites-available/000-default.conf \
    && sed -i 's#/var/www/html#/var/www/html/public#' /etc/apache2/sites-available/000-default.conf \
    && printf '<Directory /var/www/html/public>\n    AllowOverride All\n</Directory>\n' > /etc/apache2/conf-enabled/ezdeploy.conf
COPY . /var/www/html/
EXPOSE @PORT@
"#;

const STATIC: &str = r#"
FROM busybox:stable
WORKDIR /www
COPY . .
EXPOSE @PORT@
CMD ["httpd", "-f", "-p", "@PORT@", "-h", "/www"]
"#;

const FALLBACK: &str = r#"
FROM ubuntu:22.04
WORKDIR /app
COPY . .
CMD ["bash", "-c", "echo 'Application running. Configure container as needed.' && sleep infinity"]
"#;
